//! Logging support for the library
//!
//! The crate never owns process-wide logger state. Modules emit structured
//! `tracing` events at debug altitude; on top of that, a [`CallbackLogger`]
//! can be injected into a client to receive request/response frame dumps,
//! e.g. for protocol debugging or forwarding into an application log.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Severity passed to a [`LogCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Frame dumps and protocol details.
    Debug,
    /// Lifecycle events.
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failures.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Callback receiving formatted log lines.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Injected logger for request/response traffic.
///
/// With no callback installed, messages go to `tracing` at debug level;
/// frame hex dumps are produced only when enabled.
#[derive(Clone, Default)]
pub struct CallbackLogger {
    callback: Option<LogCallback>,
    hex_frames: bool,
}

impl CallbackLogger {
    /// Logger routing everything to `tracing`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logger invoking `callback` for every message.
    pub fn with_callback(callback: LogCallback) -> Self {
        Self {
            callback: Some(callback),
            hex_frames: false,
        }
    }

    /// Enable or disable frame hex dumps.
    pub fn set_hex_frames(&mut self, enabled: bool) {
        self.hex_frames = enabled;
    }

    /// Emit one message.
    pub fn log(&self, level: LogLevel, message: &str) {
        match &self.callback {
            Some(callback) => callback(level, message),
            None => debug!("[{level}] {message}"),
        }
    }

    /// Log an outgoing frame.
    pub fn log_request(&self, frame: &[u8]) {
        if self.hex_frames {
            self.log(
                LogLevel::Debug,
                &format!("TX {} bytes: {}", frame.len(), hex_dump(frame)),
            );
        }
    }

    /// Log an incoming frame.
    pub fn log_response(&self, frame: &[u8]) {
        if self.hex_frames {
            self.log(
                LogLevel::Debug,
                &format!("RX {} bytes: {}", frame.len(), hex_dump(frame)),
            );
        }
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("has_callback", &self.callback.is_some())
            .field("hex_frames", &self.hex_frames)
            .finish()
    }
}

/// Space-separated uppercase hex rendering of a frame.
fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
