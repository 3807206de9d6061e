//! Diagnostic events emitted by port listeners
//!
//! Nothing a listener absorbs is silent: address mismatches, frames that
//! fail validation and serial errors all become a [`DiagnosticEvent`]. The
//! [`DiagnosticLogger`] writes each event through the `log` facade and,
//! when a callback is installed, hands it to the application as well.

use std::fmt;
use std::sync::Arc;

use crate::utils::format::bytes_to_hex;

/// Severity of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

impl LogLevel {
    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Something a port listener noticed and handled on its own
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// Frame addressed to another slave was dropped
    AddressMismatch { port: String, address: u8, slave_id: u8 },
    /// Header could not be sized (unknown function code, short header)
    UnframeableHeader { port: String, header: Vec<u8>, reason: String },
    /// Frame failed validation (CRC, length, function code)
    MalformedFrame { port: String, frame: Vec<u8>, reason: String },
    /// Serial read failed; the listener stops
    TransportError { port: String, partial: Vec<u8>, reason: String },
    /// Byte source reached end of stream
    StreamClosed { port: String },
    /// Listener released its port
    ListenerStopped { port: String, reason: String },
}

impl DiagnosticEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            Self::AddressMismatch { .. } => LogLevel::Debug,
            Self::UnframeableHeader { .. } | Self::MalformedFrame { .. } => LogLevel::Warn,
            Self::TransportError { .. } => LogLevel::Error,
            Self::StreamClosed { .. } | Self::ListenerStopped { .. } => LogLevel::Info,
        }
    }

    pub fn port(&self) -> &str {
        match self {
            Self::AddressMismatch { port, .. }
            | Self::UnframeableHeader { port, .. }
            | Self::MalformedFrame { port, .. }
            | Self::TransportError { port, .. }
            | Self::StreamClosed { port }
            | Self::ListenerStopped { port, .. } => port,
        }
    }
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressMismatch { port, address, slave_id } => {
                write!(f, "[{}] slave address mismatch: {} != {}", port, address, slave_id)
            }
            Self::UnframeableHeader { port, header, reason } => {
                write!(f, "[{}] dropped header [{}]: {}", port, bytes_to_hex(header), reason)
            }
            Self::MalformedFrame { port, frame, reason } => {
                write!(f, "[{}] bad serial frame [{}]: {}", port, bytes_to_hex(frame), reason)
            }
            Self::TransportError { port, partial, reason } => {
                write!(f, "[{}] serial read error after {} bytes: {}", port, partial.len(), reason)
            }
            Self::StreamClosed { port } => write!(f, "[{}] serial stream closed", port),
            Self::ListenerStopped { port, reason } => {
                write!(f, "[{}] listener stopped: {}", port, reason)
            }
        }
    }
}

/// Type alias for diagnostic callback functions
pub type DiagnosticCallback = Box<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// Routes diagnostic events to `log` and an optional callback
#[derive(Clone)]
pub struct DiagnosticLogger {
    callback: Option<Arc<DiagnosticCallback>>,
    min_level: LogLevel,
}

impl DiagnosticLogger {
    /// Create a logger; the callback only sees events at or above `min_level`
    pub fn new(callback: Option<DiagnosticCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
        }
    }

    /// Log-only sink
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn report(&self, event: DiagnosticEvent) {
        log::log!(event.level().to_log(), "{}", event);

        if self.should_forward(event.level()) {
            if let Some(ref callback) = self.callback {
                callback(&event);
            }
        }
    }

    fn should_forward(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }
}

impl Default for DiagnosticLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for DiagnosticLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticLogger")
            .field("callback", &self.callback.is_some())
            .field("min_level", &self.min_level)
            .finish()
    }
}
