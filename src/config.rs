//! # RTU Server Configuration
//!
//! Server and per-port settings, loadable from YAML or JSON.
//!
//! ```yaml
//! slave_id: 5
//! request_queue_capacity: 64
//! packet_logging: false
//! ports:
//!   - device: /dev/ttyUSB0
//!     baud_rate: 19200
//!     parity: even
//!   - device: /dev/ttyUSB1
//! ```
//!
//! Missing fields fall back to 9600 baud, 8 data bits, no parity, one stop
//! bit and a one second serial timeout.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::utils::validation;

/// Default number of requests buffered between listeners and workers
pub const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 64;

/// Serial parity as written in config files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

impl From<ParityConfig> for tokio_serial::Parity {
    fn from(parity: ParityConfig) -> Self {
        match parity {
            ParityConfig::None => tokio_serial::Parity::None,
            ParityConfig::Odd => tokio_serial::Parity::Odd,
            ParityConfig::Even => tokio_serial::Parity::Even,
        }
    }
}

/// One serial device served by a port listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuPortConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub device: String,
    pub baud_rate: u32,
    /// 5-8
    pub data_bits: u8,
    /// 1 or 2
    pub stop_bits: u8,
    pub parity: ParityConfig,
    /// Serial driver timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RtuPortConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: ParityConfig::None,
            timeout_ms: 1000,
        }
    }
}

impl RtuPortConfig {
    /// 9600 8N1 on `device`
    pub fn new<S: Into<String>>(device: S) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_parity(mut self, parity: ParityConfig) -> Self {
        self.parity = parity;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.device.trim().is_empty() {
            return Err(ModbusError::configuration("serial device path is empty"));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration(format!(
                "{}: baud rate must be positive",
                self.device
            )));
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        Ok(())
    }

    /// Serial port builder for `tokio_serial::SerialStream::open`
    pub fn to_serial_builder(&self) -> ModbusResult<tokio_serial::SerialPortBuilder> {
        self.validate()?;
        Ok(tokio_serial::new(&self.device, self.baud_rate)
            .data_bits(self.serial_data_bits()?)
            .stop_bits(self.serial_stop_bits()?)
            .parity(self.parity.into())
            .timeout(self.timeout()))
    }

    fn serial_data_bits(&self) -> ModbusResult<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(ModbusError::configuration(format!(
                "{}: unsupported data bits {} (must be 5-8)",
                self.device, other
            ))),
        }
    }

    fn serial_stop_bits(&self) -> ModbusResult<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(ModbusError::configuration(format!(
                "{}: unsupported stop bits {} (must be 1 or 2)",
                self.device, other
            ))),
        }
    }
}

/// RTU server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuServerConfig {
    /// Address filter: 0 accepts every address, otherwise only this ID and
    /// broadcast frames are dispatched.
    pub slave_id: u8,
    /// Capacity of the request queue shared by all listeners
    pub request_queue_capacity: usize,
    /// Hex dump every assembled frame at debug level
    pub packet_logging: bool,
    pub ports: Vec<RtuPortConfig>,
}

impl Default for RtuServerConfig {
    fn default() -> Self {
        Self {
            slave_id: 0,
            request_queue_capacity: DEFAULT_REQUEST_QUEUE_CAPACITY,
            packet_logging: false,
            ports: Vec::new(),
        }
    }
}

impl RtuServerConfig {
    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_request_queue_capacity(mut self, capacity: usize) -> Self {
        self.request_queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> ModbusResult<()> {
        validation::validate_slave_filter(self.slave_id)
            .map_err(|e| ModbusError::configuration(e.to_string()))?;
        if self.request_queue_capacity == 0 {
            return Err(ModbusError::configuration("request queue capacity must be positive"));
        }
        for port in &self.ports {
            port.validate()?;
        }
        Ok(())
    }

    pub fn from_yaml_str(content: &str) -> ModbusResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(ModbusError::configuration(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }
}
