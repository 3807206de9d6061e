//! Modbus RTU protocol definitions
//!
//! Function codes accepted by the RTU server, the validated `RtuFrame`
//! built from raw wire bytes, and the CRC-16/MODBUS helpers.

use std::fmt;

use crc::{Crc, CRC_16_MODBUS};
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (1-247, 0 is broadcast)
pub type SlaveId = u8;

/// Broadcast slave address
pub const BROADCAST_ADDRESS: SlaveId = 0;

/// Address + function code + CRC
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this request carries a quantity-sized payload
    pub fn is_multiple_write(self) -> bool {
        matches!(self,
            ModbusFunction::WriteMultipleCoils |
            ModbusFunction::WriteMultipleRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Calculate CRC-16/MODBUS over `data`
pub fn calculate_crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Check the trailing little-endian CRC of a complete RTU frame
pub fn validate_crc(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    calculate_crc16(&frame[..data_len]) == received
}

/// A validated Modbus RTU frame
///
/// Built from the raw bytes produced by the frame assembler. Construction
/// checks the minimum length, the CRC and the function code, so any
/// `RtuFrame` in circulation is known to be well formed.
///
/// ```rust
/// use voltage_rtu_server::protocol::{ModbusFunction, RtuFrame};
///
/// let frame = RtuFrame::from_bytes(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B])?;
/// assert_eq!(frame.slave_id(), 1);
/// assert_eq!(frame.function(), ModbusFunction::ReadHoldingRegisters);
/// assert_eq!(frame.data(), &[0x00, 0x00, 0x00, 0x02]);
/// # Ok::<(), voltage_rtu_server::ModbusError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    slave_id: SlaveId,
    function: ModbusFunction,
    data: Vec<u8>,
    crc: u16,
}

impl RtuFrame {
    /// Build a frame from its parts, computing the CRC
    pub fn new(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        let mut frame = Self { slave_id, function, data, crc: 0 };
        frame.crc = calculate_crc16(&frame.body());
        frame
    }

    /// Validate raw wire bytes and build a frame from them
    pub fn from_bytes(raw: &[u8]) -> ModbusResult<Self> {
        if raw.len() < MIN_RTU_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "RTU frame too short: {} bytes (minimum {})",
                raw.len(),
                MIN_RTU_FRAME_SIZE
            )));
        }

        let data_len = raw.len() - 2;
        let received_crc = u16::from_le_bytes([raw[data_len], raw[data_len + 1]]);
        let calculated_crc = calculate_crc16(&raw[..data_len]);
        if received_crc != calculated_crc {
            return Err(ModbusError::crc_mismatch(calculated_crc, received_crc));
        }

        let function = ModbusFunction::from_u8(raw[1])?;

        Ok(Self {
            slave_id: raw[0],
            function,
            data: raw[2..data_len].to_vec(),
            crc: received_crc,
        })
    }

    /// Encode the frame for the wire (CRC is little-endian in RTU)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.body();
        bytes.extend_from_slice(&self.crc.to_le_bytes());
        bytes
    }

    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    pub fn function(&self) -> ModbusFunction {
        self.function
    }

    /// Payload between the function code and the CRC
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn crc(&self) -> u16 {
        self.crc
    }

    pub fn is_broadcast(&self) -> bool {
        self.slave_id == BROADCAST_ADDRESS
    }

    /// Starting address field, present on every supported request
    pub fn address(&self) -> Option<ModbusAddress> {
        self.data.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.data.len() + 4);
        body.push(self.slave_id);
        body.push(self.function.to_u8());
        body.extend_from_slice(&self.data);
        body
    }
}

impl fmt::Display for RtuFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slave:{} {} data:{} bytes crc:{:04X}",
            self.slave_id,
            self.function,
            self.data.len(),
            self.crc
        )
    }
}
