//! # Voltage S7 - Industrial S7 PLC Communication Library
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! A synchronous implementation of the Siemens S7 application protocol over
//! ISO-on-TCP (RFC 1006, port 102) in pure Rust, for reading and writing
//! process variables on S7-300/400/1200/1500 PLCs and querying diagnostics
//! via the System Status List (SZL).
//!
//! ## Features
//!
//! - **Textual addressing**: `DB1,X0.6`, `MW40`, `DB102,S10.15`, ...
//! - **Request planning**: adjacent tags coalesce into single reads, batches
//!   packed against the negotiated PDU size and the 20-item protocol cap
//! - **All S7 primitives**: BIT, BYTE, CHAR, INT, WORD, DINT, DWORD, REAL,
//!   LREAL, STRING, WSTRING, and arrays thereof
//! - **Transparent chunking**: strings larger than the PDU are read in
//!   slices and reassembled
//! - **Diagnostics**: CPU operating mode and module identification via SZL
//! - **Memory safe**: pure Rust, no unsafe code
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_s7::{ClientOptions, S7Client, S7Result, S7Value};
//!
//! fn main() -> S7Result<()> {
//!     // Connect to the PLC at rack 0, slot 1
//!     let mut client = S7Client::new("192.168.0.10", 0, 1, ClientOptions::default());
//!     client.connect()?;
//!
//!     // Read a few process variables in one round trip
//!     let values = client.read(&["DB1,I30", "DB1,X0.6", "DB1,R4"], true)?;
//!     println!("values: {values:?}");
//!
//!     // Write a value back
//!     client.write(&["DB1,I30"], &[S7Value::Int(25000)])?;
//!
//!     client.disconnect();
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// S7 protocol constants and size budgets
pub mod constants;

/// Tag descriptors for PLC memory addressing
pub mod tag;

/// Textual address parsing
pub mod address;

/// Dynamically typed PLC values
pub mod value;

/// Conversion between raw payload bytes and typed values
pub mod codec;

/// Fixed-buffer frame building
pub mod pdu;

/// Request frame encoding
pub mod request;

/// Response frame decoding
pub mod response;

/// Request planning against PDU budgets
pub mod planner;

/// Network transport layer for ISO-on-TCP
pub mod transport;

/// High-level S7 client
pub mod client;

/// Logging support
pub mod logging;

/// System Status List decoding
pub mod szl;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Core client API ===
pub use client::{
    BatchWrite, ClientOptions, ConnectionState, ConnectionType, ReadResult, S7Client, ToTag,
    WriteResult, tsap_from_rack_slot, tsap_from_string, tsap_to_string, DEFAULT_TCP_PORT,
    DEFAULT_TIMEOUT,
};

// === Error handling ===
pub use error::{S7Error, S7Result};

// === Core types ===
pub use address::parse_address;
pub use constants::ReturnCode;
pub use tag::{DataType, MemoryArea, Tag};
pub use value::S7Value;

// === Diagnostics ===
pub use szl::{ModuleInfo, SzlData};

// === Transport ===
pub use transport::{S7Transport, TcpTransport, TransportStats};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel};

// === Protocol limits (commonly needed constants) ===
pub use constants::{DEFAULT_PDU_SIZE, MAX_ITEMS_PER_PDU, MAX_PDU_SIZE, MIN_PDU_SIZE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage S7 v{} - Industrial S7 PLC communication library by Evan Liu",
        VERSION
    )
}
