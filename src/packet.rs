//! Packet construction and decoding.
//!
//! ```text
//! [code][declared length][payload ...][crc32 little endian]
//! ```
//!
//! The declared length counts payload bytes only, the checksum covers
//! everything that precedes it.

use crate::crc::Checksum;
use crate::protocol::{Command, CRC_LEN};

/// Incremental packet builder.
///
/// `finalize` consumes the builder, so nothing can be appended to a sealed packet.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    buff: Vec<u8>,
    checksum: Checksum,
}

impl PacketBuilder {
    pub fn new(checksum: Checksum) -> Self {
        Self {
            buff: Vec::with_capacity(2 + 256 + CRC_LEN),
            checksum,
        }
    }

    /// Start a packet with the command code and declared payload length
    pub fn command(command: Command, len: u8, checksum: Checksum) -> Self {
        Self::new(checksum).u8(command.code()).u8(len)
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buff.push(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buff.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.buff.extend_from_slice(data);
        self
    }

    /// Append the checksum of everything written so far
    pub fn finalize(mut self) -> Packet {
        let crc = self.checksum.compute(&self.buff);
        self.buff.extend_from_slice(&crc.to_le_bytes());
        Packet(self.buff)
    }
}

/// Sealed packet ready for transmission
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Packet(Vec<u8>);

/// Reasons a received packet is rejected
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("packet too short ({0} bytes)")]
    Short(usize),

    #[error("declared length {declared} does not match {actual} payload bytes")]
    Length { declared: u8, actual: usize },

    #[error("checksum mismatch (expected 0x{expected:08x}, found 0x{found:08x})")]
    Checksum { expected: u32, found: u32 },
}

impl Packet {
    /// Parse and verify a complete packet
    pub fn decode(data: &[u8], checksum: Checksum) -> Result<Self, DecodeError> {
        if data.len() < 2 + CRC_LEN {
            return Err(DecodeError::Short(data.len()));
        }

        let declared = data[1];
        let actual = data.len() - 2 - CRC_LEN;
        if declared as usize != actual {
            return Err(DecodeError::Length { declared, actual });
        }

        let (body, tail) = data.split_at(data.len() - CRC_LEN);
        let expected = checksum.compute(body);
        let found = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        if expected != found {
            return Err(DecodeError::Checksum { expected, found });
        }

        Ok(Packet(data.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn code(&self) -> u8 {
        self.0[0]
    }

    pub fn declared_len(&self) -> u8 {
        self.0[1]
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[2..self.0.len() - CRC_LEN]
    }

    pub fn crc(&self) -> u32 {
        let t = &self.0[self.0.len() - CRC_LEN..];
        u32::from_le_bytes([t[0], t[1], t[2], t[3]])
    }
}
