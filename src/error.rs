//! # RTU Server Error Handling
//!
//! This module provides the error type shared by every layer of the RTU
//! reception pipeline: opening serial ports, assembling frames off the wire,
//! validating frames and handing requests to downstream workers.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: serial read failures, broken pseudo terminals
//! - **Connection Errors**: a serial device that cannot be opened
//!
//! ### Protocol Errors
//! - **Invalid Function**: function codes the RTU framer cannot size
//! - **Frame Errors**: short or truncated frames
//! - **CRC Errors**: checksum validation failures
//! - **Protocol Errors**: lifecycle violations such as listening after shutdown
//!
//! ### Configuration
//! - **Configuration Errors**: invalid port or server configuration
//!
//! ## Error Classification
//!
//! The listener loop relies on classification to decide whether a failure
//! ends the listener or only the current frame:
//!
//! ```rust
//! use voltage_rtu_server::ModbusError;
//!
//! let noise = ModbusError::crc_mismatch(0x1234, 0x5678);
//! assert!(noise.is_protocol_error());
//! assert!(noise.is_recoverable());
//!
//! let unplugged = ModbusError::io("device disconnected");
//! assert!(unplugged.is_transport_error());
//! assert!(!unplugged.is_recoverable());
//! ```

use thiserror::Error;

/// Result type alias for RTU server operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors produced by the RTU framing layer and its supervisor
///
/// Each variant carries enough context to be logged as-is. Frame-level
/// variants never cross the port listener boundary; they are absorbed and
/// reported as diagnostics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors (serial read/write)
    ///
    /// # Examples
    /// - USB serial adapter unplugged mid-read
    /// - Pseudo terminal peer closed with an error
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// Raised when a serial device cannot be opened. This is the only
    /// transport failure that is returned to the caller of `listen`.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Protocol-level errors
    ///
    /// # Examples
    /// - Starting a listener after the server began shutting down
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Function code the RTU framer does not know how to size
    #[error("Invalid function code: {code:#04X}")]
    InvalidFunction { code: u8 },

    /// Invalid data value
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// CRC validation failure
    ///
    /// `expected` is the CRC computed over the received bytes, `actual` the
    /// CRC carried by the frame.
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Frame parsing errors
    ///
    /// # Examples
    /// - Header shorter than six bytes
    /// - Frame shorter than address + function + CRC
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a CRC mismatch error
    ///
    /// # Arguments
    ///
    /// * `expected` - CRC computed over the received bytes
    /// * `actual` - CRC value carried by the frame
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error only affects the current frame
    ///
    /// Recoverable errors are line noise: the listener discards the frame
    /// and keeps reading. Everything else ends the listener or the call
    /// that produced it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_rtu_server::ModbusError;
    ///
    /// assert!(ModbusError::invalid_function(0x99).is_recoverable());
    /// assert!(!ModbusError::connection("no such device").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            Self::InvalidFunction { .. } |
            Self::CrcMismatch { .. } |
            Self::Frame { .. }
        )
    }

    /// Check if the error is a serial transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self,
            Self::Protocol { .. } |
            Self::InvalidFunction { .. } |
            Self::Frame { .. } |
            Self::CrcMismatch { .. }
        )
    }
}

/// Convert from std::io::Error
///
/// Keeps only the message; `ModbusError` stays `Clone` so it can be fanned
/// out to diagnostics and exit reports.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}

/// Convert from tokio-serial open failures
impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::connection(err.to_string())
    }
}
