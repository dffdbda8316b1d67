//! Fixed-size envelope header.

use bytes::{BufMut, BytesMut};

use super::constants::*;
use crate::error::{GridError, Result};

/// The fixed header opening every wire envelope.
///
/// Layout, all fields in network byte order:
///
/// | offset | size | field            |
/// |--------|------|------------------|
/// | 0      | 4    | magic            |
/// | 4      | 1    | protocol version |
/// | 5      | 1    | message type     |
/// | 6      | 2    | flags            |
/// | 8      | 8    | session id       |
/// | 16     | 4    | payload length   |
/// | 20     | 4    | checksum         |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Message type tag, opaque to the transport.
    pub message_type: u8,
    /// Fragmentation flags.
    pub flags: u16,
    /// Session the message belongs to.
    pub session_id: u64,
    /// Number of payload bytes following the header.
    pub payload_len: u32,
    /// CRC-32 over the header (checksum field excluded) and the payload.
    pub checksum: u32,
}

impl EnvelopeHeader {
    /// Creates a header with a zero checksum.
    pub fn new(message_type: u8, flags: u16, session_id: u64, payload_len: u32) -> Self {
        Self {
            message_type,
            flags,
            session_id,
            payload_len,
            checksum: 0,
        }
    }

    /// Returns `true` if the FRAGMENT flag is set.
    pub fn is_fragment(&self) -> bool {
        self.flags & FLAG_FRAGMENT != 0
    }

    /// Returns `true` if the END flag is set.
    pub fn is_end(&self) -> bool {
        self.flags & FLAG_END != 0
    }

    /// Returns `true` if this envelope completes a logical message.
    pub fn completes_message(&self) -> bool {
        !self.is_fragment() || self.is_end()
    }

    /// Encodes the header into its fixed wire layout.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&MAGIC.to_be_bytes());
        out[VERSION_OFFSET] = PROTOCOL_VERSION;
        out[TYPE_OFFSET] = self.message_type;
        out[FLAGS_OFFSET..FLAGS_OFFSET + 2].copy_from_slice(&self.flags.to_be_bytes());
        out[SESSION_OFFSET..SESSION_OFFSET + 8].copy_from_slice(&self.session_id.to_be_bytes());
        out[PAYLOAD_LEN_OFFSET..PAYLOAD_LEN_OFFSET + 4]
            .copy_from_slice(&self.payload_len.to_be_bytes());
        out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&self.checksum.to_be_bytes());
        out
    }

    /// Appends the encoded header to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_slice(&self.to_bytes());
    }

    /// Decodes a header from exactly `HEADER_SIZE` bytes, validating magic
    /// and protocol version.
    pub fn parse(src: &[u8]) -> Result<Self> {
        assert!(src.len() >= HEADER_SIZE, "header parse needs {} bytes", HEADER_SIZE);

        let magic = u32::from_be_bytes(src[MAGIC_OFFSET..MAGIC_OFFSET + 4].try_into().unwrap());
        if magic != MAGIC {
            return Err(GridError::Protocol(format!("invalid magic 0x{:08x}", magic)));
        }
        let version = src[VERSION_OFFSET];
        if version != PROTOCOL_VERSION {
            return Err(GridError::Protocol(format!(
                "unsupported protocol version {}",
                version
            )));
        }

        Ok(Self {
            message_type: src[TYPE_OFFSET],
            flags: u16::from_be_bytes(src[FLAGS_OFFSET..FLAGS_OFFSET + 2].try_into().unwrap()),
            session_id: u64::from_be_bytes(src[SESSION_OFFSET..SESSION_OFFSET + 8].try_into().unwrap()),
            payload_len: u32::from_be_bytes(
                src[PAYLOAD_LEN_OFFSET..PAYLOAD_LEN_OFFSET + 4].try_into().unwrap(),
            ),
            checksum: u32::from_be_bytes(
                src[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().unwrap(),
            ),
        })
    }

    /// Computes the checksum for this header over the given payload slices.
    pub fn compute_checksum<'a>(&self, payload: impl Iterator<Item = &'a [u8]>) -> u32 {
        let bytes = self.to_bytes();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..CHECKSUM_OFFSET]);
        for slice in payload {
            hasher.update(slice);
        }
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_exact_layout() {
        let mut header = EnvelopeHeader::new(0x42, FLAG_FRAGMENT | FLAG_END, 0x1122334455667788, 0xAABBCCDD);
        header.checksum = 0x01020304;
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..4], &[0x47, 0x4C, 0x4E, 0x4B]); // "GLNK"
        assert_eq!(bytes[4], PROTOCOL_VERSION);
        assert_eq!(bytes[5], 0x42);
        assert_eq!(&bytes[6..8], &[0x00, 0x03]);
        assert_eq!(&bytes[8..16], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        assert_eq!(&bytes[16..20], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&bytes[20..24], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_roundtrip() {
        let mut header = EnvelopeHeader::new(7, FLAG_FRAGMENT, 99, 1234);
        header.checksum = 0xCAFEBABE;
        let parsed = EnvelopeHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = EnvelopeHeader::new(1, 0, 0, 0).to_bytes();
        bytes[0] ^= 0xFF;
        let err = EnvelopeHeader::parse(&bytes).unwrap_err();
        assert!(matches!(err, GridError::Protocol(_)));
        assert!(err.to_string().contains("invalid magic"));
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = EnvelopeHeader::new(1, 0, 0, 0).to_bytes();
        bytes[VERSION_OFFSET] = 99;
        let err = EnvelopeHeader::parse(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported protocol version"));
    }

    #[test]
    fn test_flag_helpers() {
        let plain = EnvelopeHeader::new(1, 0, 0, 0);
        assert!(!plain.is_fragment());
        assert!(!plain.is_end());
        assert!(plain.completes_message());

        let middle = EnvelopeHeader::new(1, FLAG_FRAGMENT, 0, 0);
        assert!(middle.is_fragment());
        assert!(!middle.completes_message());

        let last = EnvelopeHeader::new(1, FLAG_FRAGMENT | FLAG_END, 0, 0);
        assert!(last.is_end());
        assert!(last.completes_message());
    }

    #[test]
    fn test_checksum_excludes_checksum_field() {
        let mut a = EnvelopeHeader::new(1, 0, 5, 3);
        let payload: &[&[u8]] = &[b"abc"];
        let sum = a.compute_checksum(payload.iter().copied());
        a.checksum = sum;
        // Recomputing over the patched header yields the same value.
        assert_eq!(a.compute_checksum(payload.iter().copied()), sum);
    }

    #[test]
    fn test_checksum_covers_header_and_payload() {
        let base = EnvelopeHeader::new(1, 0, 5, 3);
        let sum = base.compute_checksum(std::iter::once(&b"abc"[..]));

        let other_payload = base.compute_checksum(std::iter::once(&b"abd"[..]));
        assert_ne!(sum, other_payload);

        let other_header = EnvelopeHeader::new(2, 0, 5, 3).compute_checksum(std::iter::once(&b"abc"[..]));
        assert_ne!(sum, other_header);
    }

    #[test]
    fn test_checksum_streams_across_slices() {
        let header = EnvelopeHeader::new(1, 0, 5, 6);
        let joined = header.compute_checksum(std::iter::once(&b"abcdef"[..]));
        let split: &[&[u8]] = &[b"ab", b"cd", b"ef"];
        assert_eq!(header.compute_checksum(split.iter().copied()), joined);
    }
}
