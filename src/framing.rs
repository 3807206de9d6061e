//! # RTU Frame Assembly
//!
//! Modbus RTU carries no length field and no delimiter. A receiver has to
//! work out where a request ends from its function code, which is what this
//! module does:
//!
//! - [`rtu_trailing_length`] looks at the six byte request header (slave
//!   address, function code, starting address, quantity) and returns how
//!   many bytes are still on the wire for this frame, CRC included.
//! - [`read_rtu_frame`] pulls bytes one at a time from a serial stream,
//!   asks the oracle once the header is complete, and stops when the frame
//!   is complete.
//!
//! ## Header Layout
//!
//! ```text
//! byte 0    : slave address
//! byte 1    : function code
//! byte 2, 3 : starting address
//! byte 4, 5 : quantity of coils/registers (big-endian)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use voltage_rtu_server::framing::read_rtu_frame;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let wire: &[u8] = &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];
//! let mut port = wire;
//!
//! let frame = read_rtu_frame(&mut port).await.unwrap();
//! assert_eq!(frame.len(), 8);
//!
//! // Nothing left: the stream reports a clean close.
//! assert!(read_rtu_frame(&mut port).await.unwrap_err().is_eof());
//! # }
//! ```

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;

/// Slave address + function code + starting address + quantity
pub const RTU_HEADER_SIZE: usize = 6;

/// CRC-16 trailer
pub const RTU_CRC_SIZE: usize = 2;

/// Why the assembler could not hand back a complete frame
///
/// Every variant keeps the bytes collected for the aborted frame so the
/// caller can log them.
#[derive(Error, Debug)]
pub enum FrameReadError {
    /// The stream ended. Expected when a port is closed.
    #[error("stream closed after {} bytes", .partial.len())]
    Eof { partial: Vec<u8> },

    /// The serial read itself failed.
    #[error("serial read error after {} bytes: {source}", .partial.len())]
    Transport {
        partial: Vec<u8>,
        #[source]
        source: std::io::Error,
    },

    /// The header could not be sized, e.g. an unknown function code.
    #[error("cannot frame header {}: {source}", crate::utils::format::bytes_to_hex(.header))]
    Header {
        header: Vec<u8>,
        #[source]
        source: ModbusError,
    },
}

impl FrameReadError {
    /// Bytes collected before the frame was aborted
    pub fn partial(&self) -> &[u8] {
        match self {
            Self::Eof { partial } | Self::Transport { partial, .. } => partial,
            Self::Header { header, .. } => header,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof { .. })
    }

    /// Header errors only spoil the current frame; EOF and transport errors
    /// end the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Header { .. })
    }
}

/// Number of bytes that follow the six byte header, CRC included
///
/// | Function codes | Trailing bytes |
/// |---|---|
/// | 0x01 - 0x04 (reads) | 2 |
/// | 0x05, 0x06 (single writes) | 2 |
/// | 0x0F, 0x10 (multiple writes) | `quantity * 2 + 2` |
///
/// ```rust
/// use voltage_rtu_server::framing::rtu_trailing_length;
///
/// assert_eq!(rtu_trailing_length(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]).unwrap(), 2);
/// assert_eq!(rtu_trailing_length(&[0x01, 0x0F, 0x00, 0x00, 0x00, 0x10]).unwrap(), 34);
/// assert!(rtu_trailing_length(&[0x01, 0x99, 0x00, 0x00, 0x00, 0x00]).is_err());
/// ```
pub fn rtu_trailing_length(header: &[u8]) -> ModbusResult<usize> {
    if header.len() < RTU_HEADER_SIZE {
        return Err(ModbusError::frame(format!(
            "RTU header too short: {} bytes (need {})",
            header.len(),
            RTU_HEADER_SIZE
        )));
    }

    let function = ModbusFunction::from_u8(header[1])?;
    if function.is_multiple_write() {
        let quantity = u16::from_be_bytes([header[4], header[5]]) as usize;
        Ok(quantity * 2 + RTU_CRC_SIZE)
    } else {
        Ok(RTU_CRC_SIZE)
    }
}

/// Read exactly one RTU request frame from `reader`
///
/// Bytes are read one at a time; no bytes past the end of the frame are
/// consumed, so the next call starts on the next frame.
pub async fn read_rtu_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameReadError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut frame = Vec::with_capacity(RTU_HEADER_SIZE + RTU_CRC_SIZE);
    let mut expected_len: Option<usize> = None;
    let mut byte = [0u8; 1];

    loop {
        if expected_len == Some(frame.len()) {
            break;
        }

        match reader.read(&mut byte).await {
            Ok(0) => return Err(FrameReadError::Eof { partial: frame }),
            Ok(_) => frame.push(byte[0]),
            Err(source) => return Err(FrameReadError::Transport { partial: frame, source }),
        }

        if expected_len.is_none() && frame.len() == RTU_HEADER_SIZE {
            match rtu_trailing_length(&frame) {
                Ok(trailing) => expected_len = Some(RTU_HEADER_SIZE + trailing),
                Err(source) => return Err(FrameReadError::Header { header: frame, source }),
            }
        }
    }

    tracing::trace!("[MODBUS-RTU] frame {}", crate::utils::format::bytes_to_hex(&frame));
    Ok(frame)
}
