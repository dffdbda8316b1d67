//! Typed reads over a block chain.

use crate::buffer::BlockChain;
use crate::error::{GridError, Result};

/// Reads typed records back out of a block chain, consuming from the front.
///
/// Layouts mirror [`super::ChainWriter`]: multi-byte values are big-endian,
/// strings carry the null byte and framing byte. Truncated input and
/// malformed string data surface as [`GridError::Serialization`].
#[derive(Debug)]
pub struct ChainReader {
    chain: BlockChain,
}

impl ChainReader {
    /// Creates a reader over the given chain.
    pub fn new(chain: BlockChain) -> Self {
        Self { chain }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a boolean from a single byte.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a 16-bit unsigned integer.
    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads a 16-bit signed integer.
    pub fn read_i16(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    /// Reads a 32-bit signed integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    /// Reads a 64-bit signed integer.
    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Reads a 32-bit floating point value.
    pub fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(f32::from_be_bytes(buf))
    }

    /// Reads a 64-bit floating point value.
    pub fn read_f64(&mut self) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_be_bytes(buf))
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_remaining(len)?;
        Ok(self.chain.split_to(len).into_bytes())
    }

    /// Reads a nullable string written by the chain writer.
    pub fn read_string(&mut self) -> Result<Option<String>> {
        if self.read_bool()? {
            return Ok(None);
        }
        match self.read_u8()? {
            1 => {
                let len = self.read_u16()? as usize;
                let bytes = self.read_bytes(len)?;
                decode_modified_utf8(&bytes).map(Some)
            }
            0 => {
                let count = self.read_i32()?;
                if count < 0 {
                    return Err(GridError::Serialization(format!(
                        "invalid raw string length: {}",
                        count
                    )));
                }
                let mut units = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    units.push(self.read_u16()?);
                }
                String::from_utf16(&units)
                    .map(Some)
                    .map_err(|e| GridError::Serialization(format!("invalid UTF-16 string: {}", e)))
            }
            other => Err(GridError::Serialization(format!(
                "invalid string framing byte: {}",
                other
            ))),
        }
    }

    /// Consumes the reader, returning the unread tail of the chain.
    pub fn into_remaining(self) -> BlockChain {
        self.chain
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_remaining(buf.len())?;
        let part = self.chain.split_to(buf.len());
        let mut at = 0;
        for slice in part.slices() {
            buf[at..at + slice.len()].copy_from_slice(slice);
            at += slice.len();
        }
        Ok(())
    }

    fn ensure_remaining(&self, n: usize) -> Result<()> {
        let have = self.chain.len();
        if have < n {
            Err(GridError::Serialization(format!(
                "insufficient data: need {} bytes, have {}",
                n, have
            )))
        } else {
            Ok(())
        }
    }
}

/// Decodes Java-style modified UTF-8 into a string.
fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        let unit = match b0 {
            0x00..=0x7F => {
                i += 1;
                u16::from(b0)
            }
            0xC0..=0xDF => {
                let b1 = *bytes.get(i + 1).ok_or_else(truncated)?;
                if b1 & 0xC0 != 0x80 {
                    return Err(malformed(i));
                }
                i += 2;
                (u16::from(b0 & 0x1F) << 6) | u16::from(b1 & 0x3F)
            }
            0xE0..=0xEF => {
                let b1 = *bytes.get(i + 1).ok_or_else(truncated)?;
                let b2 = *bytes.get(i + 2).ok_or_else(truncated)?;
                if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                    return Err(malformed(i));
                }
                i += 3;
                (u16::from(b0 & 0x0F) << 12) | (u16::from(b1 & 0x3F) << 6) | u16::from(b2 & 0x3F)
            }
            _ => return Err(malformed(i)),
        };
        units.push(unit);
    }
    String::from_utf16(&units)
        .map_err(|e| GridError::Serialization(format!("invalid UTF-16 string: {}", e)))
}

fn truncated() -> GridError {
    GridError::Serialization("truncated modified UTF-8 sequence".to_string())
}

fn malformed(at: usize) -> GridError {
    GridError::Serialization(format!("malformed modified UTF-8 byte at offset {}", at))
}
