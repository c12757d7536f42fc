//! Response frame decoding
//!
//! Validates the TPKT / COTP / S7 layers of every received frame, checks
//! PDU-reference correlation and the S7 error class/code pair, and slices
//! out per-item results for read, write and SZL responses.

use crate::constants::{
    COTP_PDU_TYPE_CC, COTP_PDU_TYPE_DT, DATA_TS_OCTET_STRING, FUNC_COMM_SETUP, FUNC_READ_VAR,
    FUNC_WRITE_VAR, MSG_ACK, MSG_ACK_DATA, MSG_USERDATA, ReturnCode, S7_PROTOCOL_ID, TPKT_VERSION,
    USERDATA_METHOD_RESPONSE,
};
use crate::error::{S7Error, S7Result};

/// A validated ACK_DATA or USERDATA frame, split into its sections.
#[derive(Debug)]
pub struct AckFrame<'a> {
    /// Echoed PDU reference.
    pub pdu_reference: u16,
    /// S7 message type.
    pub message_type: u8,
    /// Parameter section.
    pub parameter: &'a [u8],
    /// Data section.
    pub data: &'a [u8],
}

/// One decoded item of a READ_VAR response.
#[derive(Debug, Clone)]
pub struct ReadItem {
    /// Per-item return code; anything but `Success` means no payload.
    pub return_code: ReturnCode,
    /// Transport size code the server used for the payload.
    pub transport_size: u8,
    /// Raw payload bytes, already unpadded.
    pub data: Vec<u8>,
}

/// One fragment of a (possibly multi-fragment) SZL response.
#[derive(Debug)]
pub struct UserdataFragment {
    /// Sequence number echoed by the server.
    pub sequence: u8,
    /// True when the "last data unit" flag marks this as the final fragment.
    pub last_data_unit: bool,
    /// Data-unit payload.
    pub data: Vec<u8>,
}

/// Validate a COTP connection confirm.
pub fn parse_connect_confirm(frame: &[u8]) -> S7Result<()> {
    if frame.len() < 7 || frame[0] != TPKT_VERSION {
        return Err(S7Error::connection(
            "malformed COTP connect response from the peer",
        ));
    }
    if frame[5] != COTP_PDU_TYPE_CC {
        return Err(S7Error::connection(format!(
            "COTP connection rejected: expected CC (0xD0), got 0x{:02X}",
            frame[5]
        )));
    }
    Ok(())
}

/// Validate an S7 response frame and split it into header, parameter and
/// data sections.
///
/// Checks, in order: TPKT version and length, COTP data TPDU, S7 protocol
/// id, PDU-reference echo and (for ACK frames) the error class/code pair.
pub fn parse_ack(frame: &[u8], expected_reference: u16) -> S7Result<AckFrame<'_>> {
    if frame.len() < 17 {
        return Err(S7Error::communication(format!(
            "response frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != TPKT_VERSION {
        return Err(S7Error::protocol(format!(
            "invalid TPKT version 0x{:02X}",
            frame[0]
        )));
    }
    let tpkt_length = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if tpkt_length != frame.len() {
        return Err(S7Error::protocol(format!(
            "TPKT length {} does not match frame length {}",
            tpkt_length,
            frame.len()
        )));
    }
    if frame[5] != COTP_PDU_TYPE_DT {
        return Err(S7Error::communication(format!(
            "unexpected COTP TPDU type 0x{:02X}",
            frame[5]
        )));
    }
    if frame[7] != S7_PROTOCOL_ID {
        return Err(S7Error::protocol(format!(
            "invalid S7 protocol id 0x{:02X}",
            frame[7]
        )));
    }

    let message_type = frame[8];
    let pdu_reference = u16::from_be_bytes([frame[11], frame[12]]);
    if pdu_reference != expected_reference {
        return Err(S7Error::communication(format!(
            "PDU reference mismatch: expected {expected_reference}, got {pdu_reference}"
        )));
    }

    let parameter_length = u16::from_be_bytes([frame[13], frame[14]]) as usize;
    let data_length = u16::from_be_bytes([frame[15], frame[16]]) as usize;

    let parameter_start = match message_type {
        MSG_ACK_DATA | MSG_ACK => {
            if frame.len() < 19 {
                return Err(S7Error::communication("truncated ACK header"));
            }
            let error_class = frame[17];
            let error_code = frame[18];
            if error_class != 0 || error_code != 0 {
                return Err(S7Error::protocol(format!(
                    "S7 error class 0x{error_class:02X}, code 0x{error_code:02X}"
                )));
            }
            19
        }
        MSG_USERDATA => 17,
        other => {
            return Err(S7Error::communication(format!(
                "unexpected S7 message type 0x{other:02X}"
            )))
        }
    };

    let data_start = parameter_start + parameter_length;
    let data_end = data_start + data_length;
    if data_end > frame.len() {
        return Err(S7Error::protocol(format!(
            "inconsistent section lengths: parameter {parameter_length} + data {data_length} \
             exceed frame of {} bytes",
            frame.len()
        )));
    }

    Ok(AckFrame {
        pdu_reference,
        message_type,
        parameter: &frame[parameter_start..data_start],
        data: &frame[data_start..data_end],
    })
}

/// Decode the COMM_SETUP acknowledgement.
///
/// Returns `(max_amq_calling, max_amq_called, pdu_size)`.
pub fn parse_negotiation(ack: &AckFrame<'_>) -> S7Result<(u16, u16, u16)> {
    if ack.parameter.len() < 8 || ack.parameter[0] != FUNC_COMM_SETUP {
        return Err(S7Error::protocol("malformed COMM_SETUP acknowledgement"));
    }
    let max_amq_calling = u16::from_be_bytes([ack.parameter[2], ack.parameter[3]]);
    let max_amq_called = u16::from_be_bytes([ack.parameter[4], ack.parameter[5]]);
    let pdu_size = u16::from_be_bytes([ack.parameter[6], ack.parameter[7]]);
    Ok((max_amq_calling, max_amq_called, pdu_size))
}

/// Payload byte count from a per-item transport size and length field.
///
/// The length is in bits for the bit/byte/word/real transports and in
/// bytes for octet strings (and for error items, where it is zero).
fn payload_len_bytes(transport_size: u8, length: u16) -> usize {
    match transport_size {
        DATA_TS_OCTET_STRING | 0x00 => length as usize,
        _ => (length as usize).div_ceil(8),
    }
}

/// Decode the per-item blocks of a READ_VAR response.
pub fn parse_read_items(ack: &AckFrame<'_>, expected_items: usize) -> S7Result<Vec<ReadItem>> {
    if ack.parameter.len() < 2 || ack.parameter[0] != FUNC_READ_VAR {
        return Err(S7Error::protocol("response is not a READ_VAR acknowledgement"));
    }
    let item_count = ack.parameter[1] as usize;
    if item_count != expected_items {
        return Err(S7Error::protocol(format!(
            "read response item count {item_count} does not match request ({expected_items})"
        )));
    }

    let data = ack.data;
    let mut items = Vec::with_capacity(item_count);
    let mut offset = 0usize;

    for i in 0..item_count {
        if offset + 4 > data.len() {
            return Err(S7Error::protocol(format!(
                "truncated read response: item {i} header missing"
            )));
        }
        let return_code = ReturnCode::from_u8(data[offset]);
        let transport_size = data[offset + 1];
        let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
        offset += 4;

        let payload_len = if return_code.is_success() {
            payload_len_bytes(transport_size, length)
        } else {
            0
        };
        let end = offset + payload_len;
        if end > data.len() {
            return Err(S7Error::protocol(format!(
                "truncated read response: item {i} payload missing"
            )));
        }
        items.push(ReadItem {
            return_code,
            transport_size,
            data: data[offset..end].to_vec(),
        });
        offset = end;

        // Items are padded to even length except the last.
        if payload_len % 2 != 0 && i < item_count - 1 {
            offset += 1;
        }
    }

    Ok(items)
}

/// Decode the per-item return codes of a WRITE_VAR response.
pub fn parse_write_acks(ack: &AckFrame<'_>, expected_items: usize) -> S7Result<Vec<ReturnCode>> {
    if ack.parameter.len() < 2 || ack.parameter[0] != FUNC_WRITE_VAR {
        return Err(S7Error::protocol("response is not a WRITE_VAR acknowledgement"));
    }
    let item_count = ack.parameter[1] as usize;
    if item_count != expected_items {
        return Err(S7Error::protocol(format!(
            "write response item count {item_count} does not match request ({expected_items})"
        )));
    }
    if ack.data.len() < item_count {
        return Err(S7Error::protocol("truncated write response"));
    }
    Ok(ack.data[..item_count]
        .iter()
        .map(|&code| ReturnCode::from_u8(code))
        .collect())
}

/// Decode one USERDATA response into an SZL fragment.
pub fn parse_userdata(ack: &AckFrame<'_>) -> S7Result<UserdataFragment> {
    if ack.message_type != MSG_USERDATA {
        return Err(S7Error::protocol(format!(
            "expected USERDATA response, got message type 0x{:02X}",
            ack.message_type
        )));
    }
    let param = ack.parameter;
    if param.len() < 8 {
        return Err(S7Error::protocol("truncated USERDATA parameter block"));
    }
    if param[4] != USERDATA_METHOD_RESPONSE {
        return Err(S7Error::protocol(format!(
            "unexpected USERDATA method 0x{:02X}",
            param[4]
        )));
    }
    let sequence = param[7];

    // An 8-byte parameter block carries fragmenting state; the short form
    // always is a complete response.
    let last_data_unit = if param.len() >= 12 {
        let error_code = u16::from_be_bytes([param[10], param[11]]);
        if error_code != 0 {
            return Err(S7Error::protocol(format!(
                "SZL request failed with error 0x{error_code:04X}"
            )));
        }
        param[9] == 0x00
    } else {
        true
    };

    let data = ack.data;
    if data.len() < 4 {
        return Err(S7Error::protocol("truncated USERDATA data block"));
    }
    let return_code = ReturnCode::from_u8(data[0]);
    if !return_code.is_success() {
        return Err(S7Error::protocol(format!(
            "SZL data unit returned {return_code}"
        )));
    }
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = 4 + length;
    if end > data.len() {
        return Err(S7Error::protocol("truncated SZL data unit"));
    }

    Ok(UserdataFragment {
        sequence,
        last_data_unit,
        data: data[4..end].to_vec(),
    })
}
