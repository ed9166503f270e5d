//! Packet checksum.
//!
//! Every packet ends with a CRC-32 computed over the command code, declared
//! length and payload. The bootloader uses polynomial `0x04C11DB7` seeded with
//! `0xFFFFFFFF`, MSB first, with no reflection and no final XOR.

use core::fmt;
use core::str::FromStr;

pub const CRC_SEED: u32 = 0xFFFF_FFFF;
pub const CRC_POLY: u32 = 0x04C1_1DB7;

/// Checksum algorithm used to seal packets
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Checksum {
    /// CRC-32/MPEG-2, each byte shifted in from the top of the accumulator
    Mpeg2,
    /// Each byte handed to the accumulator as a full 32-bit word, matching the
    /// STM32 hardware CRC unit being fed one byte per write.
    WordFed,
}

impl Default for Checksum {
    fn default() -> Self {
        Checksum::Mpeg2
    }
}

impl Checksum {
    /// Compute the checksum of `data`
    pub fn compute(&self, data: &[u8]) -> u32 {
        match self {
            Checksum::Mpeg2 => mpeg2(data),
            Checksum::WordFed => word_fed(data),
        }
    }
}

impl FromStr for Checksum {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpeg2" | "mpeg-2" => Ok(Checksum::Mpeg2),
            "word" | "word-fed" | "hw" => Ok(Checksum::WordFed),
            _ => Err(format!("unknown checksum '{}' (expected mpeg2 or word)", s)),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::Mpeg2 => write!(f, "mpeg2"),
            Checksum::WordFed => write!(f, "word"),
        }
    }
}

/// Compute the packet checksum with the default (MPEG-2) algorithm
pub fn compute_checksum(data: &[u8]) -> u32 {
    mpeg2(data)
}

fn mpeg2(data: &[u8]) -> u32 {
    let mut crc = CRC_SEED;

    for b in data {
        crc ^= (*b as u32) << 24;
        for _ in 0..8 {
            crc = shift(crc);
        }
    }

    crc
}

fn word_fed(data: &[u8]) -> u32 {
    let mut crc = CRC_SEED;

    for b in data {
        crc ^= *b as u32;
        for _ in 0..32 {
            crc = shift(crc);
        }
    }

    crc
}

#[inline]
fn shift(crc: u32) -> u32 {
    if crc & 0x8000_0000 != 0 {
        (crc << 1) ^ CRC_POLY
    } else {
        crc << 1
    }
}
