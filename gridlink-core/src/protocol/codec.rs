//! Envelope codec for framed byte streams.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::envelope::EnvelopeHeader;
use crate::error::{GridError, Result};

/// One wire envelope: a fixed header and its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The envelope header. The payload length and checksum fields are
    /// filled in by the encoder.
    pub header: EnvelopeHeader,
    /// The payload bytes.
    pub payload: BytesMut,
}

impl Envelope {
    /// Creates an envelope over the given payload.
    pub fn new(header: EnvelopeHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }
}

/// Encodes and decodes envelopes on an ordered byte stream.
///
/// Implements `tokio_util::codec::{Encoder, Decoder}` for use with framed
/// I/O; the decoder validates magic, version, payload bound, and checksum.
#[derive(Debug)]
pub struct EnvelopeCodec {
    max_payload: usize,
}

impl EnvelopeCodec {
    /// Creates a codec with the default payload bound.
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Creates a codec with a custom payload bound.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = GridError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.max_payload {
            return Err(GridError::Protocol(format!(
                "payload of {} bytes exceeds the {} byte envelope bound",
                item.payload.len(),
                self.max_payload
            )));
        }
        let mut header = item.header;
        header.payload_len = item.payload.len() as u32;
        header.checksum = header.compute_checksum(std::iter::once(&item.payload[..]));

        dst.reserve(HEADER_SIZE + item.payload.len());
        header.encode_into(dst);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = GridError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = EnvelopeHeader::parse(&src[..HEADER_SIZE])?;
        let payload_len = header.payload_len as usize;
        if payload_len > self.max_payload {
            return Err(GridError::Protocol(format!(
                "payload length {} exceeds the {} byte envelope bound",
                payload_len, self.max_payload
            )));
        }

        if src.len() < HEADER_SIZE + payload_len {
            src.reserve(HEADER_SIZE + payload_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(payload_len);

        let expected = header.compute_checksum(std::iter::once(&payload[..]));
        if expected != header.checksum {
            return Err(GridError::Protocol(format!(
                "envelope checksum mismatch: expected 0x{:08x}, found 0x{:08x}",
                expected, header.checksum
            )));
        }

        Ok(Some(Envelope { header, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(message_type: u8, payload: &[u8]) -> Envelope {
        Envelope::new(
            EnvelopeHeader::new(message_type, 0, 7, 0),
            BytesMut::from(payload),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(3, b"payload"), &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE + 7);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.message_type, 3);
        assert_eq!(decoded.header.session_id, 7);
        assert_eq!(decoded.header.payload_len, 7);
        assert_eq!(&decoded.payload[..], b"payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&[0x47, 0x4C][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(1, b"abcdef"), &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 3);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(1, b""), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_decode_multiple_envelopes() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(1, b"one"), &mut buf).unwrap();
        codec.encode(envelope(2, b"two"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().header.message_type, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().header.message_type, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_corrupt_checksum_rejected() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(1, b"payload"), &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, GridError::Protocol(_)));
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_corrupt_magic_rejected() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope(1, b"x"), &mut buf).unwrap();
        buf[0] = 0;
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversize_payload_rejected_on_encode() {
        let mut codec = EnvelopeCodec::with_max_payload(4);
        let mut buf = BytesMut::new();
        let err = codec.encode(envelope(1, b"abcde"), &mut buf).unwrap_err();
        assert!(matches!(err, GridError::Protocol(_)));
    }

    #[test]
    fn test_oversize_payload_rejected_on_decode() {
        let mut big = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        big.encode(envelope(1, &[0u8; 64]), &mut buf).unwrap();

        let mut small = EnvelopeCodec::with_max_payload(16);
        assert!(small.decode(&mut buf).is_err());
    }

    #[test]
    fn test_partial_then_complete_decode() {
        let mut codec = EnvelopeCodec::new();
        let mut full = BytesMut::new();
        codec.encode(envelope(9, b"split me"), &mut full).unwrap();

        let mut partial = full.split_to(full.len() / 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(full);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.header.message_type, 9);
    }
}
