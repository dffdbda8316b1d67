//! Logical messages: a typed name/value header plus an opaque payload.

use crate::buffer::{BlockChain, BlockPool};
use crate::error::{GridError, Result};
use crate::io::{ChainReader, ChainWriter};

const KIND_BOOL: u8 = 1;
const KIND_I16: u8 = 2;
const KIND_I32: u8 = 3;
const KIND_I64: u8 = 4;
const KIND_F32: u8 = 5;
const KIND_F64: u8 = 6;
const KIND_STRING: u8 = 7;
const KIND_BYTES: u8 = 8;

/// A typed value inside a message header.
#[derive(Debug, Clone, PartialEq)]
pub enum NvValue {
    /// Boolean value.
    Bool(bool),
    /// 16-bit signed integer.
    I16(i16),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit floating point.
    F32(f32),
    /// 64-bit floating point.
    F64(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw byte array.
    Bytes(Vec<u8>),
}

impl NvValue {
    fn kind(&self) -> u8 {
        match self {
            Self::Bool(_) => KIND_BOOL,
            Self::I16(_) => KIND_I16,
            Self::I32(_) => KIND_I32,
            Self::I64(_) => KIND_I64,
            Self::F32(_) => KIND_F32,
            Self::F64(_) => KIND_F64,
            Self::Str(_) => KIND_STRING,
            Self::Bytes(_) => KIND_BYTES,
        }
    }
}

/// One header entry: a name tag plus a typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct NvPair {
    /// Name tag, meaningful to the layers above the transport.
    pub tag: u8,
    /// The typed value.
    pub value: NvValue,
}

/// A logical message.
///
/// Carries a message type and session id (which travel in the envelope
/// headers), a list of tagged name/value pairs, and an optional opaque
/// payload chain. Well-formed messages round-trip byte-identically through
/// [`encode`](Self::encode) and [`decode`](Self::decode); unknown value
/// kinds abort decoding.
#[derive(Debug)]
pub struct Message {
    message_type: u8,
    session_id: u64,
    pairs: Vec<NvPair>,
    payload: Option<BlockChain>,
}

impl Message {
    /// Creates an empty message.
    pub fn new(message_type: u8, session_id: u64) -> Self {
        Self {
            message_type,
            session_id,
            pairs: Vec::new(),
            payload: None,
        }
    }

    /// Returns the message type.
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Returns the session id.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Appends a name/value pair.
    pub fn add(&mut self, tag: u8, value: NvValue) {
        self.pairs.push(NvPair { tag, value });
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, tag: u8, value: NvValue) -> Self {
        self.add(tag, value);
        self
    }

    /// Returns all name/value pairs in insertion order.
    pub fn pairs(&self) -> &[NvPair] {
        &self.pairs
    }

    /// Returns the first value carrying `tag`, if any.
    pub fn get(&self, tag: u8) -> Option<&NvValue> {
        self.pairs.iter().find(|p| p.tag == tag).map(|p| &p.value)
    }

    /// Attaches an opaque payload chain.
    pub fn set_payload(&mut self, payload: BlockChain) {
        self.payload = Some(payload);
    }

    /// Builder-style [`set_payload`](Self::set_payload).
    pub fn with_payload(mut self, payload: BlockChain) -> Self {
        self.set_payload(payload);
        self
    }

    /// Returns the payload chain, if any.
    pub fn payload(&self) -> Option<&BlockChain> {
        self.payload.as_ref()
    }

    /// Detaches and returns the payload chain.
    pub fn take_payload(&mut self) -> Option<BlockChain> {
        self.payload.take()
    }

    /// Serializes the message body into a block chain.
    pub fn encode(self, pool: &BlockPool) -> BlockChain {
        let mut w = ChainWriter::new(pool.clone());
        w.write_i32(self.pairs.len() as i32);
        for pair in &self.pairs {
            w.write_u8(pair.tag);
            w.write_u8(pair.value.kind());
            match &pair.value {
                NvValue::Bool(v) => w.write_bool(*v),
                NvValue::I16(v) => w.write_i16(*v),
                NvValue::I32(v) => w.write_i32(*v),
                NvValue::I64(v) => w.write_i64(*v),
                NvValue::F32(v) => w.write_f32(*v),
                NvValue::F64(v) => w.write_f64(*v),
                NvValue::Str(v) => w.write_string(Some(v.as_str())),
                NvValue::Bytes(v) => {
                    w.write_i32(v.len() as i32);
                    w.write_bytes(v);
                }
            }
        }
        match self.payload {
            Some(chain) => {
                w.write_bool(true);
                w.write_chain(chain);
            }
            None => w.write_bool(false),
        }
        w.into_chain()
    }

    /// Deserializes a message body received for the given type and session.
    pub fn decode(message_type: u8, session_id: u64, body: BlockChain) -> Result<Self> {
        let mut r = ChainReader::new(body);
        let count = r.read_i32()?;
        if count < 0 {
            return Err(GridError::Serialization(format!(
                "invalid header pair count: {}",
                count
            )));
        }

        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = r.read_u8()?;
            let kind = r.read_u8()?;
            let value = match kind {
                KIND_BOOL => NvValue::Bool(r.read_bool()?),
                KIND_I16 => NvValue::I16(r.read_i16()?),
                KIND_I32 => NvValue::I32(r.read_i32()?),
                KIND_I64 => NvValue::I64(r.read_i64()?),
                KIND_F32 => NvValue::F32(r.read_f32()?),
                KIND_F64 => NvValue::F64(r.read_f64()?),
                KIND_STRING => {
                    let s = r.read_string()?.ok_or_else(|| {
                        GridError::Serialization("null string in header pair".to_string())
                    })?;
                    NvValue::Str(s)
                }
                KIND_BYTES => {
                    let len = r.read_i32()?;
                    if len < 0 {
                        return Err(GridError::Serialization(format!(
                            "invalid byte array length: {}",
                            len
                        )));
                    }
                    NvValue::Bytes(r.read_bytes(len as usize)?)
                }
                other => {
                    return Err(GridError::Protocol(format!(
                        "unknown header value tag {}",
                        other
                    )))
                }
            };
            pairs.push(NvPair { tag, value });
        }

        let payload = if r.read_bool()? {
            Some(r.into_remaining())
        } else {
            if r.remaining() > 0 {
                return Err(GridError::Serialization(format!(
                    "{} trailing bytes after message body",
                    r.remaining()
                )));
            }
            None
        };

        Ok(Self {
            message_type,
            session_id,
            pairs,
            payload,
        })
    }
}
