//! Checksum algorithms used by the block transfer
//!
//! Per-block integrity is CRC-16/XMODEM or an 8-bit sum, negotiated by the
//! receiver's start byte. Whole-file integrity is an MD5 digest sent as hex.

use md5::{Digest, Md5};

/// Length of a hex-encoded MD5 digest
pub const MD5_HEX_LEN: usize = 32;

/// Per-block check negotiated at transfer start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    /// Simple sum mod 256 (receiver started with NAK)
    Sum8,
    /// CRC-16 XMODEM (receiver started with 'C')
    Crc16,
}

impl BlockCheck {
    /// Number of trailer bytes after the block payload
    pub fn size(&self) -> usize {
        match self {
            BlockCheck::Sum8 => 1,
            BlockCheck::Crc16 => 2,
        }
    }

    /// Compute the trailer for a block payload
    pub fn calculate(&self, data: &[u8]) -> Vec<u8> {
        match self {
            BlockCheck::Sum8 => vec![sum8_checksum(data)],
            BlockCheck::Crc16 => crc16_xmodem(data).to_be_bytes().to_vec(),
        }
    }

    /// Verify a block payload against its received trailer
    pub fn verify(&self, data: &[u8], trailer: &[u8]) -> bool {
        trailer == self.calculate(data).as_slice()
    }
}

/// Simple sum mod 256
pub fn sum8_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16 XMODEM (polynomial 0x1021, init 0x0000)
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Lowercase hex MD5 digest of `data`
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Streaming MD5 for payloads that arrive block by block
#[derive(Default)]
pub struct Md5Stream {
    hasher: Md5,
}

impl Md5Stream {
    /// Start an empty digest
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finish and return the lowercase hex digest
    pub fn finish_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}
