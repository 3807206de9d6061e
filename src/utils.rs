//! Utility functions shared by the framing, listener and config layers

use crate::error::{ModbusError, ModbusResult};

/// Highest unicast slave address allowed on an RTU bus
pub const MAX_SLAVE_ID: u8 = 247;

/// Data validation utilities
pub mod validation {
    use super::*;

    /// Validate a unicast slave ID (1-247)
    pub fn validate_slave_id(slave_id: u8) -> ModbusResult<()> {
        if slave_id == 0 || slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::invalid_data(
                format!("Invalid slave ID: {} (must be 1-{})", slave_id, MAX_SLAVE_ID)
            ));
        }
        Ok(())
    }

    /// Validate the server's address filter
    ///
    /// 0 disables filtering; anything else must be a valid unicast ID.
    pub fn validate_slave_filter(slave_id: u8) -> ModbusResult<()> {
        if slave_id == 0 {
            return Ok(());
        }
        validate_slave_id(slave_id)
    }

    /// Whether a frame addressed to `address` is meant for a server whose
    /// filter is `slave_id`
    pub fn accepts_address(slave_id: u8, address: u8) -> bool {
        slave_id == 0 || address == 0 || address == slave_id
    }
}

/// Formatting and display utilities
pub mod format {
    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes.iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Logging utilities
pub mod logging {
    /// Initialize simple logger for testing
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}
