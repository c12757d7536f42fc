//! Core error types and result handling
//!
//! All fallible operations in the library return [`S7Result`], whose error
//! type [`S7Error`] distinguishes the failure domains a caller may want to
//! react to: bad addresses, connection setup, wire-level communication,
//! protocol violations, timeouts, PDU capacity and per-item return codes.

use thiserror::Error;

use crate::constants::ReturnCode;

/// Result alias used throughout the library.
pub type S7Result<T> = Result<T, S7Error>;

/// Errors produced by the S7 client library.
#[derive(Debug, Error)]
pub enum S7Error {
    /// Invalid textual address or out-of-range tag field.
    #[error("Address error: {message}")]
    Address { message: String },

    /// TCP/DNS failure, COTP handshake rejection or COMM_SETUP failure.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Peer closed, unexpected frame or PDU reference mismatch.
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// Nonzero S7 error class/code, malformed header or bad transport size.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// A send or recv exceeded the configured timeout.
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// A single non-chunkable tag cannot fit the negotiated PDU.
    #[error("PDU error: {tag} requires {required} bytes but only {available} bytes fit the negotiated PDU")]
    Pdu {
        tag: String,
        required: usize,
        available: usize,
    },

    /// Per-item read failure reported by the PLC.
    #[error("Read error for {tag}: {code}")]
    ReadItem { tag: String, code: ReturnCode },

    /// Per-item write failure reported by the PLC.
    #[error("Write error for {tag}: {code}")]
    WriteItem { tag: String, code: ReturnCode },

    /// Value/type mismatch on write, string too long, array length mismatch.
    #[error("Value error: {message}")]
    Value { message: String },

    /// A batch write failed and the best-effort rollback failed too.
    #[error("{primary}; rollback failed: {failure}")]
    RollbackFailed {
        #[source]
        primary: Box<S7Error>,
        failure: String,
    },
}

impl S7Error {
    /// Create an address error.
    pub fn address(message: impl Into<String>) -> Self {
        S7Error::Address {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        S7Error::Connection {
            message: message.into(),
        }
    }

    /// Create a communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        S7Error::Communication {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        S7Error::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        S7Error::Timeout {
            message: message.into(),
        }
    }

    /// Create a value error.
    pub fn value(message: impl Into<String>) -> Self {
        S7Error::Value {
            message: message.into(),
        }
    }

    /// True for errors after which the session is no longer usable
    /// and must be reconnected.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            S7Error::Communication { .. } | S7Error::Timeout { .. } | S7Error::Connection { .. }
        )
    }
}
