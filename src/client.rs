//! High-level S7 client
//!
//! [`S7Client`] drives one synchronous session against a PLC: COTP/COMM_SETUP
//! handshake, PDU-reference correlation, planned reads and writes, transparent
//! chunked string reads, SZL diagnostics and a transactional batch write.
//!
//! # Architecture
//!
//! The client is generic over [`S7Transport`], so the protocol logic is
//! implemented once and exercised against scripted transports in tests while
//! production code uses the blocking [`TcpTransport`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voltage_s7::{ClientOptions, S7Client, S7Result, S7Value};
//!
//! fn main() -> S7Result<()> {
//!     let mut client = S7Client::new("192.168.0.10", 0, 1, ClientOptions::default());
//!     client.connect()?;
//!
//!     let values = client.read(&["DB1,I30", "DB1,X0.6", "DB1,R4"], true)?;
//!     println!("values: {values:?}");
//!
//!     client.write(&["DB1,I30"], &[S7Value::Int(25000)])?;
//!
//!     println!("CPU is {}", client.get_cpu_status()?);
//!     client.disconnect();
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use tracing::{debug, warn};

use crate::address::parse_address;
use crate::codec;
use crate::constants::{
    DEFAULT_LOCAL_TSAP, DEFAULT_PDU_SIZE, MAX_PDU_SIZE, MIN_PDU_SIZE, ReturnCode,
    SZL_ID_CPU_DIAGNOSTIC_STATUS, SZL_ID_MODULE_IDENT,
};
use crate::error::{S7Error, S7Result};
use crate::logging::CallbackLogger;
use crate::planner::{self, ReadPlan};
use crate::request;
use crate::response::{self, AckFrame};
use crate::szl::{self, ModuleInfo, SzlData};
use crate::tag::{DataType, Tag};
use crate::transport::{S7Transport, TcpTransport, TransportStats};
use crate::value::S7Value;

/// Default TCP port for ISO-on-TCP.
pub const DEFAULT_TCP_PORT: u16 = 102;

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a reassembled SZL payload; a server that keeps streaming
/// fragments past this is misbehaving.
const MAX_SZL_PAYLOAD: usize = 0x1_0000;

// ============================================================================
// Configuration
// ============================================================================

/// Kind of S7 connection, encoded into the high byte of the derived remote
/// TSAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    /// Standard data connection (0x01).
    #[default]
    S7Basic,
    /// Programming-device connection (0x02).
    Pg,
    /// Operator-panel connection (0x03).
    Op,
}

impl ConnectionType {
    /// TSAP high byte for this connection type.
    pub fn code(self) -> u8 {
        match self {
            ConnectionType::S7Basic => 0x01,
            ConnectionType::Pg => 0x02,
            ConnectionType::Op => 0x03,
        }
    }
}

/// Connection parameters; built with the `with_*` methods.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_s7::ClientOptions;
///
/// let options = ClientOptions::default()
///     .with_pdu_size(480)
///     .with_timeout(Duration::from_secs(2));
/// assert_eq!(options.pdu_size, 480);
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP port, default 102.
    pub port: u16,
    /// PDU size requested at COMM_SETUP, default 960.
    pub pdu_size: u16,
    /// Per-operation timeout for connect, send and recv, default 5 s.
    pub timeout: Duration,
    /// Connection type used when deriving the remote TSAP from rack/slot.
    pub connection_type: ConnectionType,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_TCP_PORT,
            pdu_size: DEFAULT_PDU_SIZE,
            timeout: DEFAULT_TIMEOUT,
            connection_type: ConnectionType::S7Basic,
        }
    }
}

impl ClientOptions {
    /// Set the TCP port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the requested PDU size.
    pub fn with_pdu_size(mut self, pdu_size: u16) -> Self {
        self.pdu_size = pdu_size;
        self
    }

    /// Set the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connection type.
    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }
}

/// Session state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable transport.
    Disconnected,
    /// TCP/COTP establishment in progress.
    Connecting,
    /// COMM_SETUP in flight.
    Negotiating,
    /// Connected and idle.
    Ready,
    /// A request/response pair is in flight.
    InRequest,
    /// Teardown in progress.
    Closing,
}

// ============================================================================
// Tag input and per-item results
// ============================================================================

/// Anything that resolves to a [`Tag`]: textual addresses or tags.
pub trait ToTag {
    /// Resolve into a validated tag.
    fn to_tag(&self) -> S7Result<Tag>;
}

impl ToTag for Tag {
    fn to_tag(&self) -> S7Result<Tag> {
        Ok(*self)
    }
}

impl ToTag for &Tag {
    fn to_tag(&self) -> S7Result<Tag> {
        Ok(**self)
    }
}

impl ToTag for str {
    fn to_tag(&self) -> S7Result<Tag> {
        parse_address(self)
    }
}

impl ToTag for &str {
    fn to_tag(&self) -> S7Result<Tag> {
        parse_address(self)
    }
}

impl ToTag for String {
    fn to_tag(&self) -> S7Result<Tag> {
        parse_address(self)
    }
}

/// Per-item outcome of [`S7Client::read_detailed`].
#[derive(Debug, Clone)]
pub struct ReadResult {
    /// The tag that was read.
    pub tag: Tag,
    /// The decoded value, or the PLC's per-item return code.
    pub value: Result<S7Value, ReturnCode>,
}

impl ReadResult {
    /// True when the item was read successfully.
    pub fn success(&self) -> bool {
        self.value.is_ok()
    }
}

/// Per-item outcome of [`S7Client::write_detailed`].
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// The tag that was written.
    pub tag: Tag,
    /// Success, or the PLC's per-item return code.
    pub status: Result<(), ReturnCode>,
}

impl WriteResult {
    /// True when the item was written successfully.
    pub fn success(&self) -> bool {
        self.status.is_ok()
    }
}

// ============================================================================
// TSAP helpers
// ============================================================================

/// Derive a remote TSAP from rack and slot: `0x0100 | (rack * 32 + slot)`.
pub fn tsap_from_rack_slot(rack: u16, slot: u16) -> u16 {
    0x0100 | (rack * 32 + slot)
}

/// Parse a TIA-Portal style TSAP string (`"RR.SS"`, hex bytes).
///
/// ```rust
/// use voltage_s7::tsap_from_string;
///
/// assert_eq!(tsap_from_string("03.01").unwrap(), 0x0301);
/// ```
pub fn tsap_from_string(tsap: &str) -> S7Result<u16> {
    let parts: Vec<&str> = tsap.split('.').collect();
    if parts.len() != 2 {
        return Err(S7Error::value(format!(
            "TSAP '{tsap}' must be in format 'XX.YY'"
        )));
    }
    let mut bytes = [0u16; 2];
    for (i, part) in parts.iter().enumerate() {
        let value = u16::from_str_radix(part, 16).map_err(|_| {
            S7Error::value(format!("TSAP '{tsap}' must contain hexadecimal numbers"))
        })?;
        if value > 0xFF {
            return Err(S7Error::value(format!(
                "TSAP byte '{part}' must be in range 0x00-0xFF"
            )));
        }
        bytes[i] = value;
    }
    Ok((bytes[0] << 8) | bytes[1])
}

/// Render a TSAP as a TIA-Portal style string.
///
/// ```rust
/// use voltage_s7::tsap_to_string;
///
/// assert_eq!(tsap_to_string(0x0301), "03.01");
/// ```
pub fn tsap_to_string(tsap: u16) -> String {
    format!("{:02x}.{:02x}", tsap >> 8, tsap & 0xFF)
}

// ============================================================================
// Client
// ============================================================================

/// Synchronous S7 client; one session per instance, not shareable across
/// threads.
pub struct S7Client<T: S7Transport = TcpTransport> {
    host: String,
    options: ClientOptions,
    local_tsap: u16,
    remote_tsap: u16,
    transport: Option<T>,
    state: ConnectionState,
    pdu_size: u16,
    next_reference: u16,
    logger: CallbackLogger,
}

impl<T: S7Transport> S7Client<T> {
    /// Create a client addressing the PLC by rack and slot.
    ///
    /// The remote TSAP is derived from the connection type and
    /// `rack * 32 + slot`; the local TSAP defaults to 0x0100.
    pub fn new(host: impl Into<String>, rack: u16, slot: u16, options: ClientOptions) -> Self {
        let remote_tsap =
            (u16::from(options.connection_type.code()) << 8) | (rack * 32 + slot);
        Self::with_tsap(host, DEFAULT_LOCAL_TSAP, remote_tsap, options)
    }

    /// Create a client with explicit local and remote TSAPs.
    pub fn with_tsap(
        host: impl Into<String>,
        local_tsap: u16,
        remote_tsap: u16,
        options: ClientOptions,
    ) -> Self {
        let pdu_size = options.pdu_size;
        Self {
            host: host.into(),
            options,
            local_tsap,
            remote_tsap,
            transport: None,
            state: ConnectionState::Disconnected,
            pdu_size,
            next_reference: 1,
            logger: CallbackLogger::new(),
        }
    }

    /// Install an injected logger for request/response traffic.
    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.logger = logger;
    }

    /// Host this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Negotiated PDU size (the requested size before `connect`).
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    /// Current session state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// True when the session is usable.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Ready | ConnectionState::InRequest
        ) && self.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    /// Transport statistics; zeroed when disconnected.
    pub fn stats(&self) -> TransportStats {
        self.transport
            .as_ref()
            .map(|t| t.stats())
            .unwrap_or_default()
    }

    /// Close the connection unconditionally; idempotent.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Closing;
        self.teardown();
    }

    /// Run the COTP and COMM_SETUP handshake over an already-established
    /// transport, e.g. one created by [`TcpTransport::connect`].
    pub fn connect_with(&mut self, transport: T) -> S7Result<()> {
        self.state = ConnectionState::Connecting;
        self.transport = Some(transport);
        self.next_reference = 1;

        match self.handshake() {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                debug!(
                    host = %self.host,
                    pdu = self.pdu_size,
                    "session established"
                );
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(match e {
                    S7Error::Connection { .. } => e,
                    other => S7Error::connection(format!("connection setup failed: {other}")),
                })
            }
        }
    }

    fn handshake(&mut self) -> S7Result<()> {
        let cr = request::connection_request(self.local_tsap, self.remote_tsap)?;
        let response = self.exchange(cr.as_slice())?;
        response::parse_connect_confirm(&response)?;

        self.state = ConnectionState::Negotiating;
        let requested = self.options.pdu_size.clamp(MIN_PDU_SIZE, MAX_PDU_SIZE);
        if requested != self.options.pdu_size {
            warn!(
                requested = self.options.pdu_size,
                adjusted = requested,
                "requested PDU size outside protocol range, adjusted"
            );
        }

        let reference = self.allocate_reference();
        let frame = request::negotiation_request(reference, requested)?;
        let response = self.exchange(frame.as_slice())?;
        let ack = self.parse_ack(&response, reference)?;
        let (_, _, proposed) = response::parse_negotiation(&ack)?;

        self.pdu_size = validate_and_adjust_pdu(requested, proposed)?;
        Ok(())
    }

    /// Take the next PDU reference: monotonically increasing modulo 2^16,
    /// skipping 0 at wraparound.
    fn allocate_reference(&mut self) -> u16 {
        let reference = self.next_reference;
        self.next_reference = if reference == u16::MAX { 1 } else { reference + 1 };
        reference
    }

    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close();
        }
        self.state = ConnectionState::Disconnected;
    }

    fn ensure_ready(&self) -> S7Result<()> {
        if self.state == ConnectionState::Ready && self.transport.is_some() {
            Ok(())
        } else {
            Err(S7Error::connection(
                "not connected to PLC; call connect() before performing operations",
            ))
        }
    }

    /// One frame exchange; any transport failure tears the session down.
    fn exchange(&mut self, frame: &[u8]) -> S7Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| S7Error::connection("not connected"))?;
        self.logger.log_request(frame);
        match transport.exchange(frame) {
            Ok(response) => {
                self.logger.log_response(&response);
                Ok(response)
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Validate a response frame; a fatal violation (reference mismatch,
    /// broken framing) tears the session down.
    fn parse_ack<'a>(&mut self, frame: &'a [u8], reference: u16) -> S7Result<AckFrame<'a>> {
        match response::parse_ack(frame, reference) {
            Ok(ack) => Ok(ack),
            Err(e) => {
                if e.is_fatal() {
                    self.teardown();
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Read the given tags and return their values in input order.
    ///
    /// With `optimize` the planner coalesces adjacent ranges into fewer,
    /// larger reads. Fails on the first per-item error; use
    /// [`read_detailed`](Self::read_detailed) to collect per-item outcomes.
    pub fn read<S: ToTag>(&mut self, tags: &[S], optimize: bool) -> S7Result<Vec<S7Value>> {
        self.ensure_ready()?;
        let tags = resolve_tags(tags)?;
        let plan = planner::plan_read(&tags, self.pdu_size, optimize)?;

        self.state = ConnectionState::InRequest;
        let result = self.execute_read_plan(tags.len(), &plan, None);
        self.finish_request();
        result
    }

    /// Read tags and report a per-item outcome for each, never failing the
    /// whole call on a per-item return code.
    pub fn read_detailed<S: ToTag>(&mut self, tags: &[S]) -> S7Result<Vec<ReadResult>> {
        self.ensure_ready()?;
        let tags = resolve_tags(tags)?;
        let plan = planner::plan_read(&tags, self.pdu_size, false)?;

        let mut item_errors: Vec<Option<ReturnCode>> = vec![None; tags.len()];
        self.state = ConnectionState::InRequest;
        let values = self.execute_read_plan(tags.len(), &plan, Some(&mut item_errors));
        self.finish_request();
        let values = values?;

        Ok(tags
            .into_iter()
            .zip(values)
            .zip(item_errors)
            .map(|((tag, value), error)| ReadResult {
                tag,
                value: match error {
                    Some(code) => Err(code),
                    None => Ok(value),
                },
            })
            .collect())
    }

    /// Execute a read plan. With `item_errors` provided, per-item failures
    /// are recorded there instead of failing the call (failed slots yield a
    /// default value that the caller replaces with the error).
    fn execute_read_plan(
        &mut self,
        tag_count: usize,
        plan: &ReadPlan,
        mut item_errors: Option<&mut Vec<Option<ReturnCode>>>,
    ) -> S7Result<Vec<S7Value>> {
        let mut results: Vec<Option<S7Value>> = vec![None; tag_count];

        for batch in &plan.batches {
            let wire_tags: Vec<Tag> = batch.items.iter().map(|item| item.tag).collect();
            let reference = self.allocate_reference();
            let frame = request::read_request(reference, &wire_tags)?;
            let response = self.exchange(frame.as_slice())?;
            let ack = self.parse_ack(&response, reference)?;
            let items = response::parse_read_items(&ack, batch.items.len())?;

            for (planned, item) in batch.items.iter().zip(&items) {
                if !item.return_code.is_success() {
                    match item_errors.as_deref_mut() {
                        Some(errors) => {
                            for slice in &planned.slices {
                                errors[slice.index] = Some(item.return_code);
                                results[slice.index] = Some(S7Value::default());
                            }
                            continue;
                        }
                        None => {
                            let tag = planned
                                .slices
                                .first()
                                .map(|s| s.tag.to_string())
                                .unwrap_or_else(|| planned.tag.to_string());
                            return Err(S7Error::ReadItem {
                                tag,
                                code: item.return_code,
                            });
                        }
                    }
                }
                let direct = planned.is_direct();
                for slice in &planned.slices {
                    let value = if direct {
                        codec::decode_payload(&slice.tag, &item.data)?
                    } else {
                        codec::decode_slice(&slice.tag, &item.data, slice.offset)?
                    };
                    results[slice.index] = Some(value);
                }
            }
        }

        for (index, tag) in &plan.chunked {
            match self.read_chunked_string(tag) {
                Ok(value) => results[*index] = Some(value),
                Err(S7Error::ReadItem { code, tag: failed }) => match item_errors.as_deref_mut() {
                    Some(errors) => {
                        errors[*index] = Some(code);
                        results[*index] = Some(S7Value::default());
                    }
                    None => return Err(S7Error::ReadItem { code, tag: failed }),
                },
                Err(other) => return Err(other),
            }
        }

        results
            .into_iter()
            .map(|value| {
                value.ok_or_else(|| S7Error::protocol("planner did not cover every requested tag"))
            })
            .collect()
    }

    /// Read one oversized STRING/WSTRING transparently in chunks: first the
    /// length header, then BYTE slices sized to the PDU, concatenated and
    /// decoded as text.
    fn read_chunked_string(&mut self, tag: &Tag) -> S7Result<S7Value> {
        let (header_size, char_width) = match tag.data_type() {
            DataType::String => (2usize, 1usize),
            DataType::WString => (4, 2),
            other => {
                return Err(S7Error::protocol(format!(
                    "chunked read is only defined for strings, not {other:?}"
                )))
            }
        };

        let header_tag = byte_window(tag, 0, header_size)?;
        let header = self.read_raw_item(&header_tag, tag)?;
        if header.len() < header_size {
            return Err(S7Error::protocol(format!(
                "short string header for {tag}: {} bytes",
                header.len()
            )));
        }

        let current_chars = match tag.data_type() {
            DataType::String => (header[1] as usize).min(header[0] as usize),
            _ => {
                let max = u16::from_be_bytes([header[0], header[1]]) as usize;
                (u16::from_be_bytes([header[2], header[3]]) as usize).min(max)
            }
        };

        let total = (header_size + current_chars * char_width).min(tag.size());
        let chunk_size = planner::max_item_payload(self.pdu_size);
        debug!(%tag, total, chunk_size, "chunked string read");

        let mut buffer = Vec::with_capacity(total);
        let mut offset = 0usize;
        while offset < total {
            let part_len = chunk_size.min(total - offset);
            let part_tag = byte_window(tag, offset, part_len)?;
            let data = self.read_raw_item(&part_tag, tag)?;
            if data.len() < part_len {
                return Err(S7Error::protocol(format!(
                    "short chunk for {tag}: expected {part_len} bytes, got {}",
                    data.len()
                )));
            }
            buffer.extend_from_slice(&data[..part_len]);
            offset += part_len;
        }

        codec::decode_payload(tag, &buffer)
    }

    /// Issue a single-item read and return the raw payload. Item failures
    /// are attributed to `origin`.
    fn read_raw_item(&mut self, item_tag: &Tag, origin: &Tag) -> S7Result<Vec<u8>> {
        let reference = self.allocate_reference();
        let frame = request::read_request(reference, std::slice::from_ref(item_tag))?;
        let response = self.exchange(frame.as_slice())?;
        let ack = self.parse_ack(&response, reference)?;
        let items = response::parse_read_items(&ack, 1)?;
        let item = items
            .into_iter()
            .next()
            .ok_or_else(|| S7Error::protocol("empty read response"))?;
        if !item.return_code.is_success() {
            return Err(S7Error::ReadItem {
                tag: origin.to_string(),
                code: item.return_code,
            });
        }
        Ok(item.data)
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Write `values[i]` to `tags[i]`. Fails on any per-item error; writes
    /// already acknowledged in earlier batches stay committed.
    pub fn write<S: ToTag>(&mut self, tags: &[S], values: &[S7Value]) -> S7Result<()> {
        let results = self.write_detailed(tags, values)?;
        for result in results {
            if let Err(code) = result.status {
                return Err(S7Error::WriteItem {
                    tag: result.tag.to_string(),
                    code,
                });
            }
        }
        Ok(())
    }

    /// Write tags and report a per-item outcome for each.
    pub fn write_detailed<S: ToTag>(
        &mut self,
        tags: &[S],
        values: &[S7Value],
    ) -> S7Result<Vec<WriteResult>> {
        self.ensure_ready()?;
        let tags = resolve_tags(tags)?;
        if tags.len() != values.len() {
            return Err(S7Error::value(format!(
                "the number of tags ({}) must equal the number of values ({})",
                tags.len(),
                values.len()
            )));
        }

        let payloads: Vec<Vec<u8>> = tags
            .iter()
            .zip(values)
            .map(|(tag, value)| codec::encode_value(tag, value))
            .collect::<S7Result<_>>()?;
        let batches = planner::plan_write(&tags, self.pdu_size)?;

        self.state = ConnectionState::InRequest;
        let result = self.execute_write_batches(&tags, &payloads, &batches);
        self.finish_request();
        result
    }

    fn execute_write_batches(
        &mut self,
        tags: &[Tag],
        payloads: &[Vec<u8>],
        batches: &[Vec<usize>],
    ) -> S7Result<Vec<WriteResult>> {
        let mut results: Vec<WriteResult> = Vec::with_capacity(tags.len());

        for batch in batches {
            let wire_tags: Vec<Tag> = batch.iter().map(|&i| tags[i]).collect();
            let wire_payloads: Vec<Vec<u8>> = batch.iter().map(|&i| payloads[i].clone()).collect();

            let reference = self.allocate_reference();
            let frame = request::write_request(reference, &wire_tags, &wire_payloads)?;
            let response = self.exchange(frame.as_slice())?;
            let ack = self.parse_ack(&response, reference)?;
            let acks = response::parse_write_acks(&ack, batch.len())?;

            for (&index, code) in batch.iter().zip(acks) {
                results.push(WriteResult {
                    tag: tags[index],
                    status: if code.is_success() { Ok(()) } else { Err(code) },
                });
            }
        }

        Ok(results)
    }

    /// Open a transactional write scope.
    ///
    /// Current values of all touched tags are recorded before writing; if
    /// any item fails, the committed items are rolled back to their
    /// originals before the error surfaces.
    pub fn batch_write(&mut self) -> BatchWrite<'_, T> {
        BatchWrite {
            client: self,
            entries: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics (SZL)
    // ------------------------------------------------------------------

    /// Read one System Status List, transparently reassembling
    /// multi-fragment responses until the last-data-unit flag is set.
    pub fn read_szl(&mut self, szl_id: u16, szl_index: u16) -> S7Result<SzlData> {
        self.ensure_ready()?;
        self.state = ConnectionState::InRequest;
        let result = self.read_szl_fragments(szl_id, szl_index);
        self.finish_request();
        result
    }

    fn read_szl_fragments(&mut self, szl_id: u16, szl_index: u16) -> S7Result<SzlData> {
        let mut payload: Vec<u8> = Vec::new();
        let mut sequence: u8 = 1;

        loop {
            let reference = self.allocate_reference();
            let frame = request::szl_request(reference, szl_id, szl_index, sequence)?;
            let response = self.exchange(frame.as_slice())?;
            let ack = self.parse_ack(&response, reference)?;
            let fragment = response::parse_userdata(&ack)?;

            payload.extend_from_slice(&fragment.data);
            if fragment.last_data_unit {
                break;
            }
            if payload.len() > MAX_SZL_PAYLOAD {
                return Err(S7Error::protocol(
                    "SZL response keeps growing without a last-data-unit flag",
                ));
            }
            sequence = sequence.wrapping_add(1);
            if sequence == 0 {
                sequence = 1;
            }
        }

        debug!(
            szl_id = format_args!("0x{szl_id:04X}"),
            bytes = payload.len(),
            "SZL reassembled"
        );
        SzlData::parse(&payload)
    }

    /// CPU operating mode: `"RUN"`, `"STOP"` or `"UNKNOWN(0xNN)"`.
    pub fn get_cpu_status(&mut self) -> S7Result<String> {
        let data = self.read_szl(SZL_ID_CPU_DIAGNOSTIC_STATUS, 0x0000)?;
        szl::cpu_status(&data)
    }

    /// Identification of the CPU module (order number, hardware and
    /// firmware version).
    pub fn get_cpu_info(&mut self) -> S7Result<ModuleInfo> {
        let data = self.read_szl(SZL_ID_MODULE_IDENT, 0x0000)?;
        let modules = szl::module_list(&data)?;
        modules
            .into_iter()
            .next()
            .ok_or_else(|| S7Error::protocol("module identification list is empty"))
    }

    /// Identification records of all modules from SZL 0x0011.
    pub fn get_module_list(&mut self) -> S7Result<Vec<ModuleInfo>> {
        let data = self.read_szl(SZL_ID_MODULE_IDENT, 0x0000)?;
        szl::module_list(&data)
    }

    fn finish_request(&mut self) {
        if self.state == ConnectionState::InRequest {
            self.state = ConnectionState::Ready;
        }
    }
}

impl S7Client<TcpTransport> {
    /// Open the TCP connection and run the handshake.
    ///
    /// On any failure the socket is closed, the session returns to
    /// `Disconnected` and a [`S7Error::Connection`] is returned.
    pub fn connect(&mut self) -> S7Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        let transport =
            TcpTransport::connect(&self.host, self.options.port, self.options.timeout).map_err(
                |e| {
                    self.state = ConnectionState::Disconnected;
                    S7Error::connection(format!(
                        "failed to connect to {}:{}: {e}",
                        self.host, self.options.port
                    ))
                },
            )?;
        self.connect_with(transport)
    }
}

impl<T: S7Transport> std::fmt::Debug for S7Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Client")
            .field("host", &self.host)
            .field("state", &self.state)
            .field("pdu_size", &self.pdu_size)
            .field("local_tsap", &format_args!("0x{:04X}", self.local_tsap))
            .field("remote_tsap", &format_args!("0x{:04X}", self.remote_tsap))
            .finish()
    }
}

/// Validate the server's proposed PDU size and pick the effective one.
fn validate_and_adjust_pdu(requested: u16, proposed: u16) -> S7Result<u16> {
    if proposed < MIN_PDU_SIZE {
        return Err(S7Error::connection(format!(
            "server proposed invalid PDU size {proposed} (minimum {MIN_PDU_SIZE})"
        )));
    }
    let proposed = if proposed > MAX_PDU_SIZE {
        warn!(
            proposed,
            max = MAX_PDU_SIZE,
            "server proposed unusually large PDU size, clamping to protocol maximum"
        );
        MAX_PDU_SIZE
    } else {
        proposed
    };
    Ok(requested.min(proposed))
}

fn resolve_tags<S: ToTag>(tags: &[S]) -> S7Result<Vec<Tag>> {
    tags.iter().map(|tag| tag.to_tag()).collect()
}

/// A BYTE tag covering `len` bytes of `origin`'s range starting at
/// `offset`; used for string headers and chunk slices.
fn byte_window(origin: &Tag, offset: usize, len: usize) -> S7Result<Tag> {
    Tag::new(
        origin.memory_area(),
        origin.db_number(),
        DataType::Byte,
        origin.start() + offset as u32,
        0,
        len as u16,
    )
}

// ============================================================================
// Batch write transaction
// ============================================================================

/// Transactional write scope created by [`S7Client::batch_write`].
///
/// Entries accumulate with [`add`](Self::add) and are written by
/// [`commit`](Self::commit); dropping the scope without committing writes
/// nothing.
pub struct BatchWrite<'a, T: S7Transport> {
    client: &'a mut S7Client<T>,
    entries: Vec<(S7Result<Tag>, S7Value)>,
}

impl<T: S7Transport> BatchWrite<'_, T> {
    /// Queue one write; address errors surface at commit time.
    pub fn add(mut self, tag: impl ToTag, value: impl Into<S7Value>) -> Self {
        self.entries.push((tag.to_tag(), value.into()));
        self
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record current values, write all entries, and roll the committed
    /// items back to their originals if any item fails.
    ///
    /// The first per-item failure surfaces as [`S7Error::WriteItem`]; a
    /// failed rollback is attached via [`S7Error::RollbackFailed`].
    pub fn commit(self) -> S7Result<Vec<WriteResult>> {
        let mut tags = Vec::with_capacity(self.entries.len());
        let mut values = Vec::with_capacity(self.entries.len());
        for (tag, value) in self.entries {
            tags.push(tag?);
            values.push(value);
        }
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let originals = self.client.read(&tags, false)?;
        let results = self.client.write_detailed(&tags, &values)?;

        let failure = results
            .iter()
            .find_map(|r| r.status.err().map(|code| (r.tag, code)));
        let Some((failed_tag, code)) = failure else {
            return Ok(results);
        };
        let primary = S7Error::WriteItem {
            tag: failed_tag.to_string(),
            code,
        };

        let mut rollback_tags = Vec::new();
        let mut rollback_values = Vec::new();
        for (i, result) in results.iter().enumerate() {
            if result.success() {
                rollback_tags.push(tags[i]);
                rollback_values.push(originals[i].clone());
            }
        }
        if rollback_tags.is_empty() {
            return Err(primary);
        }

        debug!(
            items = rollback_tags.len(),
            "rolling back committed batch items"
        );
        match self.client.write(&rollback_tags, &rollback_values) {
            Ok(()) => Err(primary),
            Err(rollback_error) => Err(S7Error::RollbackFailed {
                primary: Box::new(primary),
                failure: rollback_error.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // =========================================================================
    // Scripted transport
    // =========================================================================

    /// Mock transport replaying canned response frames and recording every
    /// request frame for verification.
    struct MockTransport {
        requests: Vec<Vec<u8>>,
        responses: VecDeque<S7Result<Vec<u8>>>,
        connected: bool,
        stats: TransportStats,
    }

    impl MockTransport {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                requests: Vec::new(),
                responses: responses.into_iter().map(Ok).collect(),
                connected: true,
                stats: TransportStats::default(),
            }
        }

        fn push_error(&mut self, error: S7Error) {
            self.responses.push_back(Err(error));
        }
    }

    impl S7Transport for MockTransport {
        fn exchange(&mut self, frame: &[u8]) -> S7Result<Vec<u8>> {
            self.requests.push(frame.to_vec());
            self.stats.requests_sent += 1;
            self.responses
                .pop_front()
                .unwrap_or_else(|| Err(S7Error::communication("no scripted response")))
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn close(&mut self) -> S7Result<()> {
            self.connected = false;
            Ok(())
        }

        fn stats(&self) -> TransportStats {
            self.stats
        }
    }

    // =========================================================================
    // Frame fixtures
    // =========================================================================

    fn cc_frame() -> Vec<u8> {
        vec![
            0x03, 0x00, 0x00, 0x16, 0x11, 0xD0, 0x00, 0x01, 0x00, 0x02, 0x00, 0xC0, 0x01, 0x0A,
            0xC1, 0x02, 0x01, 0x00, 0xC2, 0x02, 0x01, 0x01,
        ]
    }

    fn ack_frame(reference: u16, parameter: &[u8], data: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x03, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0x02, 0xF0, 0x80]);
        frame.push(0x32);
        frame.push(0x03);
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&reference.to_be_bytes());
        frame.extend_from_slice(&(parameter.len() as u16).to_be_bytes());
        frame.extend_from_slice(&(data.len() as u16).to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(parameter);
        frame.extend_from_slice(data);
        let total = frame.len() as u16;
        frame[2..4].copy_from_slice(&total.to_be_bytes());
        frame
    }

    fn negotiation_ack(reference: u16, pdu: u16) -> Vec<u8> {
        let mut parameter = vec![0xF0, 0x00, 0x00, 0x01, 0x00, 0x01];
        parameter.extend_from_slice(&pdu.to_be_bytes());
        ack_frame(reference, &parameter, &[])
    }

    /// Read response data for successful items given `(transport, payload)`
    /// pairs, with inter-item padding.
    fn read_data(items: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut data = Vec::new();
        for (i, (transport, payload)) in items.iter().enumerate() {
            data.push(0xFF);
            data.push(*transport);
            let length = match *transport {
                0x09 | 0x00 => payload.len() as u16,
                0x03 => payload.len() as u16, // bits
                _ => (payload.len() * 8) as u16,
            };
            data.extend_from_slice(&length.to_be_bytes());
            data.extend_from_slice(payload);
            if payload.len() % 2 != 0 && i < items.len() - 1 {
                data.push(0x00);
            }
        }
        data
    }

    fn read_ack(reference: u16, items: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let parameter = [0x04, items.len() as u8];
        ack_frame(reference, &parameter, &read_data(items))
    }

    fn write_ack(reference: u16, codes: &[u8]) -> Vec<u8> {
        let parameter = [0x05, codes.len() as u8];
        ack_frame(reference, &parameter, codes)
    }

    fn userdata_response(reference: u16, sequence: u8, last: bool, payload: &[u8]) -> Vec<u8> {
        let mut parameter = vec![0x00, 0x01, 0x12, 0x08, 0x12, 0x84, 0x01, sequence];
        parameter.extend_from_slice(&[0x00, if last { 0x00 } else { 0x01 }, 0x00, 0x00]);

        let mut data = vec![0xFF, 0x09];
        data.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        data.extend_from_slice(payload);

        let mut frame = vec![0x03, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0x02, 0xF0, 0x80]);
        frame.push(0x32);
        frame.push(0x07);
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&reference.to_be_bytes());
        frame.extend_from_slice(&(parameter.len() as u16).to_be_bytes());
        frame.extend_from_slice(&(data.len() as u16).to_be_bytes());
        frame.extend_from_slice(&parameter);
        frame.extend_from_slice(&data);
        let total = frame.len() as u16;
        frame[2..4].copy_from_slice(&total.to_be_bytes());
        frame
    }

    fn connected_client(
        responses: Vec<Vec<u8>>,
        options: ClientOptions,
    ) -> S7Client<MockTransport> {
        let mut all = vec![cc_frame(), negotiation_ack(1, options.pdu_size)];
        all.extend(responses);
        let mut client = S7Client::<MockTransport>::new("192.168.100.10", 0, 1, options);
        client.connect_with(MockTransport::new(all)).unwrap();
        client
    }

    fn sent_frames<'a>(client: &'a S7Client<MockTransport>) -> &'a [Vec<u8>] {
        client.transport.as_ref().map(|t| t.requests.as_slice()).unwrap_or(&[])
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    #[test]
    fn test_connect_sends_cr_and_setup_frames() {
        let client = connected_client(vec![], ClientOptions::default());
        assert!(client.is_connected());
        assert_eq!(client.connection_state(), ConnectionState::Ready);
        assert_eq!(client.pdu_size(), 960);

        let frames = sent_frames(&client);
        assert_eq!(frames.len(), 2);
        // COTP CR with rack 0 / slot 1 TSAPs.
        assert_eq!(
            frames[0],
            vec![
                0x03, 0x00, 0x00, 0x16, 0x11, 0xE0, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x01,
                0x0A, 0xC1, 0x02, 0x01, 0x00, 0xC2, 0x02, 0x01, 0x01,
            ]
        );
        // COMM_SETUP with reference 1 and requested PDU 0x03C0.
        assert_eq!(
            frames[1],
            vec![
                0x03, 0x00, 0x00, 0x19, 0x02, 0xF0, 0x80, 0x32, 0x01, 0x00, 0x00, 0x00, 0x01,
                0x00, 0x08, 0x00, 0x00, 0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x03, 0xC0,
            ]
        );
    }

    #[test]
    fn test_negotiation_takes_server_minimum() {
        let responses = vec![cc_frame(), negotiation_ack(1, 480)];
        let mut client =
            S7Client::<MockTransport>::new("plc", 0, 1, ClientOptions::default());
        client.connect_with(MockTransport::new(responses)).unwrap();
        assert_eq!(client.pdu_size(), 480);
    }

    #[test]
    fn test_negotiation_rejects_tiny_pdu() {
        let responses = vec![cc_frame(), negotiation_ack(1, 100)];
        let mut client =
            S7Client::<MockTransport>::new("plc", 0, 1, ClientOptions::default());
        let err = client.connect_with(MockTransport::new(responses)).unwrap_err();
        assert!(matches!(err, S7Error::Connection { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_cotp_rejection_fails_connect() {
        // A CR echoed back instead of a CC.
        let mut cr = cc_frame();
        cr[5] = 0xE0;
        let mut client =
            S7Client::<MockTransport>::new("plc", 0, 1, ClientOptions::default());
        let err = client.connect_with(MockTransport::new(vec![cr])).unwrap_err();
        assert!(matches!(err, S7Error::Connection { .. }));
    }

    #[test]
    fn test_with_tsap_uses_explicit_values() {
        let responses = vec![cc_frame(), negotiation_ack(1, 960)];
        let mut client = S7Client::<MockTransport>::with_tsap(
            "plc",
            0x0300,
            0x0302,
            ClientOptions::default(),
        );
        client.connect_with(MockTransport::new(responses)).unwrap();
        let frames = sent_frames(&client);
        assert_eq!(&frames[0][14..18], &[0xC1, 0x02, 0x03, 0x00]);
        assert_eq!(&frames[0][18..22], &[0xC2, 0x02, 0x03, 0x02]);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[test]
    fn test_read_single_int() {
        let mut client = connected_client(
            vec![read_ack(2, &[(0x04, vec![0x61, 0xA8])])],
            ClientOptions::default(),
        );
        let values = client.read(&["DB1,I30"], true).unwrap();
        assert_eq!(values, vec![S7Value::Int(25000)]);

        let frames = sent_frames(&client);
        let read_frame = &frames[2];
        // PDU reference 2, one item spec for INT at DB1 byte 30.
        assert_eq!(&read_frame[11..13], &[0x00, 0x02]);
        assert_eq!(
            &read_frame[19..31],
            &[0x12, 0x0A, 0x10, 0x04, 0x00, 0x01, 0x00, 0x01, 0x84, 0x00, 0x00, 0xF0]
        );
    }

    #[test]
    fn test_read_references_increase() {
        let mut client = connected_client(
            vec![
                read_ack(2, &[(0x04, vec![0x00, 0x01])]),
                read_ack(3, &[(0x04, vec![0x00, 0x02])]),
            ],
            ClientOptions::default(),
        );
        assert_eq!(client.read(&["DB1,I0"], true).unwrap(), vec![S7Value::Int(1)]);
        assert_eq!(client.read(&["DB1,I0"], true).unwrap(), vec![S7Value::Int(2)]);

        let frames = sent_frames(&client);
        assert_eq!(&frames[2][11..13], &[0x00, 0x02]);
        assert_eq!(&frames[3][11..13], &[0x00, 0x03]);
    }

    #[test]
    fn test_read_reference_mismatch_disconnects() {
        let mut client = connected_client(
            vec![read_ack(99, &[(0x04, vec![0x00, 0x01])])],
            ClientOptions::default(),
        );
        let err = client.read(&["DB1,I0"], true).unwrap_err();
        assert!(matches!(err, S7Error::Communication { .. }));
        assert!(!client.is_connected());

        // Further operations fail fast until reconnect.
        let err = client.read(&["DB1,I0"], true).unwrap_err();
        assert!(matches!(err, S7Error::Connection { .. }));
    }

    #[test]
    fn test_read_per_item_error_fails_call() {
        let data = [
            0xFF, 0x04, 0x00, 0x10, 0x00, 0x01, // ok
            0x0A, 0x00, 0x00, 0x00, // OBJECT_DOES_NOT_EXIST
        ];
        let frame = ack_frame(2, &[0x04, 0x02], &data);
        let mut client = connected_client(vec![frame], ClientOptions::default());
        let err = client.read(&["DB1,I0", "DB99,I10"], false).unwrap_err();
        match err {
            S7Error::ReadItem { tag, code } => {
                assert_eq!(tag, "DB99,I10");
                assert_eq!(code, ReturnCode::ObjectDoesNotExist);
            }
            other => panic!("expected ReadItem error, got {other:?}"),
        }
        // Session survives a per-item failure.
        assert!(client.is_connected());
    }

    #[test]
    fn test_read_detailed_collects_per_item_errors() {
        let data = [
            0xFF, 0x03, 0x00, 0x01, 0x01, 0x00, // bit true, padded
            0x0A, 0x00, 0x00, 0x00, // error item
            0xFF, 0x04, 0x00, 0x10, 0x00, 0x64, // int 100
        ];
        let frame = ack_frame(2, &[0x04, 0x03], &data);
        let mut client = connected_client(vec![frame], ClientOptions::default());

        let results = client
            .read_detailed(&["DB1,X0.0", "DB99,I10", "DB1,I4"])
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].success());
        assert_eq!(results[0].value, Ok(S7Value::Bool(true)));
        assert_eq!(results[1].value, Err(ReturnCode::ObjectDoesNotExist));
        assert_eq!(results[2].value, Ok(S7Value::Int(100)));
    }

    #[test]
    fn test_optimized_read_coalesces_and_restores_order() {
        // Three adjacent INTs given out of order; the planner coalesces
        // them into one 6-byte block read.
        let block = vec![0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C]; // values 10, 11, 12
        let mut client = connected_client(
            vec![read_ack(2, &[(0x04, block)])],
            ClientOptions::default(),
        );

        let values = client.read(&["DB1,I4", "DB1,I0", "DB1,I2"], true).unwrap();
        assert_eq!(
            values,
            vec![S7Value::Int(12), S7Value::Int(10), S7Value::Int(11)]
        );

        // Exactly one read request went out (after the two handshake frames)
        // and it carries a single item spanning 6 bytes.
        let frames = sent_frames(&client);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2][18], 0x01); // item count
        assert_eq!(&frames[2][23..25], &[0x00, 0x06]); // element count
    }

    #[test]
    fn test_read_packed_bits() {
        // Two bits of the same byte: one BYTE read, bit 0 and bit 6 sliced
        // out of the payload 0b0100_0001.
        let mut client = connected_client(
            vec![read_ack(2, &[(0x04, vec![0b0100_0001])])],
            ClientOptions::default(),
        );
        let values = client.read(&["DB1,X0.0", "DB1,X0.6"], true).unwrap();
        assert_eq!(values, vec![S7Value::Bool(true), S7Value::Bool(true)]);
    }

    #[test]
    fn test_chunked_string_read() {
        // STRING[254] at DB1 byte 10 with PDU 240: a 2-byte header read,
        // then 214- and 42-byte slices covering header + 254 characters.
        let options = ClientOptions::default().with_pdu_size(240);

        let mut part1 = vec![254u8, 254];
        part1.extend(std::iter::repeat(b'A').take(212));
        let part2 = vec![b'A'; 42];

        let mut client = connected_client(
            vec![
                read_ack(2, &[(0x04, vec![254, 254])]),
                read_ack(3, &[(0x04, part1)]),
                read_ack(4, &[(0x04, part2)]),
            ],
            options,
        );

        let values = client.read(&["DB1,S10.254"], true).unwrap();
        let text = values[0].as_str().unwrap();
        assert_eq!(text.len(), 254);
        assert!(text.bytes().all(|b| b == b'A'));

        // Header read, then two chunk reads of 214 and 42 bytes.
        let frames = sent_frames(&client);
        assert_eq!(frames.len(), 5);
        assert_eq!(&frames[2][23..25], &[0x00, 0x02]);
        assert_eq!(&frames[3][23..25], &[0x00, 0xD6]); // 214
        assert_eq!(&frames[4][23..25], &[0x00, 0x2A]); // 42
        // Chunk starts: byte 10 and byte 224.
        assert_eq!(&frames[3][28..31], &[0x00, 0x00, 0x50]);
        assert_eq!(&frames[4][28..31], &[0x00, 0x07, 0x00]);
    }

    #[test]
    fn test_short_string_reads_without_chunking() {
        let options = ClientOptions::default().with_pdu_size(240);
        let mut payload = vec![10u8, 5];
        payload.extend_from_slice(b"hello");
        payload.resize(12, 0);
        let mut client =
            connected_client(vec![read_ack(2, &[(0x09, payload)])], options);
        let values = client.read(&["DB1,S0.10"], true).unwrap();
        assert_eq!(values[0], S7Value::Text("hello".into()));
    }

    #[test]
    fn test_read_transport_error_disconnects() {
        let mut client = connected_client(vec![], ClientOptions::default());
        if let Some(transport) = client.transport.as_mut() {
            transport.push_error(S7Error::timeout("recv timed out"));
        }
        let err = client.read(&["DB1,I0"], true).unwrap_err();
        assert!(matches!(err, S7Error::Timeout { .. }));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    // =========================================================================
    // Writes
    // =========================================================================

    #[test]
    fn test_write_single_int() {
        let mut client =
            connected_client(vec![write_ack(2, &[0xFF])], ClientOptions::default());
        client
            .write(&["DB1,I30"], &[S7Value::Int(25000)])
            .unwrap();

        let frames = sent_frames(&client);
        let frame = &frames[2];
        assert_eq!(frame[17], 0x05); // WRITE_VAR
        assert_eq!(
            &frame[31..37],
            &[0x00, 0x04, 0x00, 0x10, 0x61, 0xA8]
        );
    }

    #[test]
    fn test_write_bit_preserves_byte_semantics() {
        // A bit write is sent with bit transport and a single payload byte;
        // the PLC touches only the addressed bit.
        let mut client =
            connected_client(vec![write_ack(2, &[0xFF])], ClientOptions::default());
        client.write(&["DB1,X0.6"], &[S7Value::Bool(true)]).unwrap();

        let frames = sent_frames(&client);
        let frame = &frames[2];
        // Item spec: BIT transport, one bit, address 6.
        assert_eq!(
            &frame[19..31],
            &[0x12, 0x0A, 0x10, 0x01, 0x00, 0x01, 0x00, 0x01, 0x84, 0x00, 0x00, 0x06]
        );
        // Data section: bit transport, length 1 bit, payload 0x01.
        assert_eq!(&frame[31..36], &[0x00, 0x03, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn test_write_per_item_error() {
        let mut client =
            connected_client(vec![write_ack(2, &[0xFF, 0x05])], ClientOptions::default());
        let err = client
            .write(
                &["DB1,I0", "DB1,I2"],
                &[S7Value::Int(1), S7Value::Int(2)],
            )
            .unwrap_err();
        match err {
            S7Error::WriteItem { tag, code } => {
                assert_eq!(tag, "DB1,I2");
                assert_eq!(code, ReturnCode::AddressOutOfRange);
            }
            other => panic!("expected WriteItem error, got {other:?}"),
        }
    }

    #[test]
    fn test_write_detailed_reports_outcomes() {
        let mut client =
            connected_client(vec![write_ack(2, &[0xFF, 0x0A])], ClientOptions::default());
        let results = client
            .write_detailed(
                &["DB1,I0", "DB1,I2"],
                &[S7Value::Int(1), S7Value::Int(2)],
            )
            .unwrap();
        assert!(results[0].success());
        assert_eq!(results[1].status, Err(ReturnCode::ObjectDoesNotExist));
    }

    #[test]
    fn test_write_length_mismatch() {
        let mut client = connected_client(vec![], ClientOptions::default());
        let err = client.write(&["DB1,I0"], &[]).unwrap_err();
        assert!(matches!(err, S7Error::Value { .. }));
    }

    #[test]
    fn test_write_value_kind_mismatch() {
        let mut client = connected_client(vec![], ClientOptions::default());
        let err = client
            .write(&["DB1,I0"], &[S7Value::Text("nope".into())])
            .unwrap_err();
        assert!(matches!(err, S7Error::Value { .. }));
    }

    // =========================================================================
    // Batch write transaction
    // =========================================================================

    #[test]
    fn test_batch_write_commit_success() {
        let mut client = connected_client(
            vec![
                // Pre-read of originals (two INTs, separate items).
                read_ack(
                    2,
                    &[(0x04, vec![0x00, 0x01]), (0x04, vec![0x00, 0x02])],
                ),
                write_ack(3, &[0xFF, 0xFF]),
            ],
            ClientOptions::default(),
        );

        let results = client
            .batch_write()
            .add("DB1,I0", 100i64)
            .add("DB1,I2", 200i64)
            .commit()
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success()));
    }

    #[test]
    fn test_batch_write_rolls_back_on_partial_failure() {
        let mut client = connected_client(
            vec![
                // Originals: I0 = 1, I2 = 2.
                read_ack(
                    2,
                    &[(0x04, vec![0x00, 0x01]), (0x04, vec![0x00, 0x02])],
                ),
                // I0 commits, I2 fails.
                write_ack(3, &[0xFF, 0x05]),
                // Rollback of I0 succeeds.
                write_ack(4, &[0xFF]),
            ],
            ClientOptions::default(),
        );

        let err = client
            .batch_write()
            .add("DB1,I0", 100i64)
            .add("DB1,I2", 200i64)
            .commit()
            .unwrap_err();
        match err {
            S7Error::WriteItem { tag, code } => {
                assert_eq!(tag, "DB1,I2");
                assert_eq!(code, ReturnCode::AddressOutOfRange);
            }
            other => panic!("expected WriteItem error, got {other:?}"),
        }

        // The rollback frame restores the original value 1 to DB1,I0.
        let frames = sent_frames(&client);
        assert_eq!(frames.len(), 5);
        let rollback = &frames[4];
        assert_eq!(rollback[17], 0x05);
        assert_eq!(rollback[18], 0x01);
        assert_eq!(&rollback[31..37], &[0x00, 0x04, 0x00, 0x10, 0x00, 0x01]);
    }

    #[test]
    fn test_batch_write_rollback_failure_attaches_cause() {
        let mut client = connected_client(
            vec![
                read_ack(
                    2,
                    &[(0x04, vec![0x00, 0x01]), (0x04, vec![0x00, 0x02])],
                ),
                write_ack(3, &[0xFF, 0x05]),
                write_ack(4, &[0x0A]), // rollback rejected
            ],
            ClientOptions::default(),
        );

        let err = client
            .batch_write()
            .add("DB1,I0", 100i64)
            .add("DB1,I2", 200i64)
            .commit()
            .unwrap_err();
        match err {
            S7Error::RollbackFailed { primary, failure } => {
                assert!(matches!(*primary, S7Error::WriteItem { .. }));
                assert!(failure.contains("OBJECT_DOES_NOT_EXIST"));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_write_empty_commit() {
        let mut client = connected_client(vec![], ClientOptions::default());
        let results = client.batch_write().commit().unwrap();
        assert!(results.is_empty());
    }

    // =========================================================================
    // SZL diagnostics
    // =========================================================================

    fn diagnostic_payload(mode: u8) -> Vec<u8> {
        let mut payload = vec![0x04, 0x24, 0x00, 0x00, 0x00, 0x14, 0x00, 0x01];
        payload.extend_from_slice(&[0x02, 0x51, 0xFF, mode]);
        payload.extend_from_slice(&[0x00; 16]);
        payload
    }

    #[test]
    fn test_get_cpu_status() {
        let mut client = connected_client(
            vec![userdata_response(2, 1, true, &diagnostic_payload(0x08))],
            ClientOptions::default(),
        );
        assert_eq!(client.get_cpu_status().unwrap(), "RUN");

        let frames = sent_frames(&client);
        // SZL id 0x0424, index 0.
        assert_eq!(&frames[2][29..33], &[0x04, 0x24, 0x00, 0x00]);
    }

    #[test]
    fn test_get_cpu_status_unknown_mode() {
        let mut client = connected_client(
            vec![userdata_response(2, 1, true, &diagnostic_payload(0x05))],
            ClientOptions::default(),
        );
        assert_eq!(client.get_cpu_status().unwrap(), "UNKNOWN(0x05)");
    }

    #[test]
    fn test_szl_fragment_reassembly() {
        // SZL 0x0011 split across two fragments; the second carries the
        // remaining record bytes.
        let mut record = vec![0x00, 0x01];
        record.extend_from_slice(b"6ES7 512-1DK01-0AB0 ");
        record.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, b'V', 0x02]);
        assert_eq!(record.len(), 28);

        let mut first = vec![0x00, 0x11, 0x00, 0x00, 0x00, 0x1C, 0x00, 0x01];
        first.extend_from_slice(&record[..14]);
        let second = record[14..].to_vec();

        let mut client = connected_client(
            vec![
                userdata_response(2, 1, false, &first),
                userdata_response(3, 2, true, &second),
            ],
            ClientOptions::default(),
        );

        let info = client.get_cpu_info().unwrap();
        assert_eq!(info.order_number, "6ES7 512-1DK01-0AB0");
        assert_eq!(info.hardware_version, "V5");
        assert_eq!(info.firmware_version, "V86.2");

        // The second request advanced the sequence number.
        let frames = sent_frames(&client);
        assert_eq!(frames[2][24], 0x01);
        assert_eq!(frames[3][24], 0x02);
    }

    // =========================================================================
    // Lifecycle and helpers
    // =========================================================================

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut client = connected_client(vec![], ClientOptions::default());
        client.disconnect();
        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(client.read(&["DB1,I0"], true).is_err());
    }

    #[test]
    fn test_operations_require_connection() {
        let mut client =
            S7Client::<MockTransport>::new("plc", 0, 1, ClientOptions::default());
        assert!(matches!(
            client.read(&["DB1,I0"], true).unwrap_err(),
            S7Error::Connection { .. }
        ));
        assert!(matches!(
            client
                .write(&["DB1,I0"], &[S7Value::Int(0)])
                .unwrap_err(),
            S7Error::Connection { .. }
        ));
        assert!(matches!(
            client.get_cpu_status().unwrap_err(),
            S7Error::Connection { .. }
        ));
    }

    #[test]
    fn test_tsap_from_rack_slot() {
        assert_eq!(tsap_from_rack_slot(0, 1), 0x0101);
        assert_eq!(tsap_from_rack_slot(0, 2), 0x0102);
        assert_eq!(tsap_from_rack_slot(1, 0), 0x0120);
        assert_eq!(tsap_from_rack_slot(2, 3), 0x0100 | (2 * 32 + 3));
    }

    #[test]
    fn test_tsap_string_round_trip() {
        assert_eq!(tsap_from_string("03.00").unwrap(), 0x0300);
        assert_eq!(tsap_from_string("3.0").unwrap(), 0x0300);
        assert_eq!(tsap_from_string("ff.ff").unwrap(), 0xFFFF);
        assert_eq!(tsap_to_string(0x0301), "03.01");
        assert_eq!(tsap_to_string(0xFFFF), "ff.ff");

        for text in ["0300", "03.00.01", "xx.yy", "100.00", "03.100"] {
            assert!(tsap_from_string(text).is_err(), "{text}");
        }

        for tsap in [0x0300u16, 0x2200, 0x0101, 0x0000] {
            assert_eq!(tsap_from_string(&tsap_to_string(tsap)).unwrap(), tsap);
        }
    }

    #[test]
    fn test_stats_exposed() {
        let client = connected_client(vec![], ClientOptions::default());
        assert_eq!(client.stats().requests_sent, 2);
    }
}
