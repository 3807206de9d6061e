//! # Voltage RTU Server - Modbus RTU Framing and Request Dispatch
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **License:** MIT
//!
//! The receive side of a Modbus RTU server. Serial ports deliver an endless
//! byte stream with no delimiters and no length field; this crate cuts that
//! stream into validated frames, filters them by slave address and hands
//! each one, together with the port it came from, to your workers.
//!
//! ## Features
//!
//! - **Function-code framing**: frame length derived from the request header
//! - **Many ports, one queue**: one tokio task per serial port, one bounded
//!   request queue shared by all of them
//! - **Noise tolerant**: bad CRCs, unknown function codes and foreign slave
//!   addresses are dropped and reported, never fatal
//! - **Cooperative shutdown**: `shutdown()` returns once every port is released
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Trailing bytes after header |
//! |------|----------|-----------------------------|
//! | 0x01 | Read Coils | 2 |
//! | 0x02 | Read Discrete Inputs | 2 |
//! | 0x03 | Read Holding Registers | 2 |
//! | 0x04 | Read Input Registers | 2 |
//! | 0x05 | Write Single Coil | 2 |
//! | 0x06 | Write Single Register | 2 |
//! | 0x0F | Write Multiple Coils | quantity * 2 + 2 |
//! | 0x10 | Write Multiple Registers | quantity * 2 + 2 |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_rtu_server::{ModbusRtuServer, RtuPortConfig, RtuServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RtuServerConfig::default().with_slave_id(1);
//!     let mut server = ModbusRtuServer::with_config(config)?;
//!     let mut requests = server.take_requests().expect("first call");
//!
//!     server.listen(&RtuPortConfig::new("/dev/ttyUSB0").with_baud_rate(19200))?;
//!
//!     while let Some(request) = requests.recv().await {
//!         println!("{} on {}", request.frame, request.port.name());
//!     }
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐
//! │ Serial port │   │ Serial port │      byte sources
//! └─────────────┘   └─────────────┘
//!        │                 │
//! ┌─────────────┐   ┌─────────────┐
//! │  Listener   │   │  Listener   │      framing + address filter + validation
//! └─────────────┘   └─────────────┘
//!        │                 │
//!        └───────┬─────────┘
//!        ┌───────────────┐
//!        │ Request queue │               RtuRequest { port, frame }
//!        └───────────────┘
//!                │
//!        ┌───────────────┐
//!        │    Workers    │               (application)
//!        └───────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus RTU frame definitions and CRC
pub mod protocol;

/// Frame length oracle and byte-at-a-time frame assembler
pub mod framing;

/// Per-port listener state machine
pub mod listener;

/// Listener supervisor
pub mod server;

/// Server and serial port configuration
pub mod config;

/// Structured diagnostic events
pub mod diagnostics;

/// Utility functions
pub mod utils;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use protocol::{ModbusFunction, RtuFrame, SlaveId};
pub use framing::{read_rtu_frame, rtu_trailing_length, FrameReadError};
pub use listener::{ListenerExit, ListenerState, ListenerStats, PortHandle, RtuPortListener, RtuRequest};
pub use server::{ListenerReport, ModbusRtuServer, ServerStats};
pub use config::{ParityConfig, RtuPortConfig, RtuServerConfig};
pub use diagnostics::{DiagnosticEvent, DiagnosticLogger, LogLevel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage RTU Server v{} - Modbus RTU framing and dispatch by Evan Liu", VERSION)
}
