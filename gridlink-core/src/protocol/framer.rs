//! Packing logical messages into envelopes and reassembling them.

use tracing::trace;

use super::constants::*;
use super::envelope::EnvelopeHeader;
use crate::buffer::{Block, BlockChain, BlockPool};
use crate::error::{GridError, Result};

/// Receives assembled logical messages on the worker owning a connection.
///
/// The sink takes ownership of the payload chain and is responsible for
/// releasing its blocks. Implementations must not block; they run on the
/// connection's worker.
pub trait MessageSink: Send {
    /// Called once per logical message, strictly in arrival order.
    fn on_message(&mut self, message_type: u8, session_id: u64, payload: BlockChain);
}

impl<F> MessageSink for F
where
    F: FnMut(u8, u64, BlockChain) + Send,
{
    fn on_message(&mut self, message_type: u8, session_id: u64, payload: BlockChain) {
        self(message_type, session_id, payload)
    }
}

/// A logical message reassembled from one or more envelopes.
#[derive(Debug)]
pub struct AssembledMessage {
    /// Message type from the envelope headers.
    pub message_type: u8,
    /// Session id from the envelope headers.
    pub session_id: u64,
    /// The reassembled payload, borrowed from the pool.
    pub payload: BlockChain,
}

/// Packs a logical message into its wire envelopes.
///
/// Payloads up to `max_payload` travel in a single envelope. Larger payloads
/// are split into `ceil(len / max_payload)` envelopes carrying the FRAGMENT
/// flag, the last also carrying END; fragment order equals chain order.
/// Header blocks are acquired from the pool; payload blocks are passed
/// through by reference.
pub fn frame_message(
    pool: &BlockPool,
    message_type: u8,
    session_id: u64,
    mut payload: BlockChain,
    max_payload: usize,
) -> BlockChain {
    assert!(max_payload > 0, "max payload must be greater than zero");

    let total = payload.len();
    let fragmented = total > max_payload;
    let mut wire = BlockChain::new();
    loop {
        let part = payload.split_to(payload.len().min(max_payload));
        let last = payload.is_empty();

        let mut flags = 0;
        if fragmented {
            flags |= FLAG_FRAGMENT;
            if last {
                flags |= FLAG_END;
            }
        }

        let mut header = EnvelopeHeader::new(message_type, flags, session_id, part.len() as u32);
        header.checksum = header.compute_checksum(part.slices());

        let mut header_block = pool.acquire_sized(HEADER_SIZE);
        header_block.put_slice(&header.to_bytes());
        wire.push(header_block);
        wire.extend(part);

        if last {
            break;
        }
    }
    trace!(
        message_type,
        session_id,
        total,
        wire_len = wire.len(),
        "framed message"
    );
    wire
}

enum AssembleState {
    AwaitHeader,
    AwaitPayload {
        header: EnvelopeHeader,
        remaining: usize,
        crc: crc32fast::Hasher,
        chain: BlockChain,
    },
}

/// Per-connection receive accumulator.
///
/// Consumes raw blocks read from the socket and yields logical messages in
/// arrival order. Payload bytes are collected into blocks borrowed from the
/// pool, so undispatched input counts against the pool's outstanding limit
/// and back-pressure reaches the reader. Any protocol fault discards the
/// partially assembled message; the caller closes the connection.
pub struct MessageAssembler {
    pool: BlockPool,
    max_payload: usize,
    header_buf: Vec<u8>,
    state: AssembleState,
    message: BlockChain,
    meta: Option<(u8, u64)>,
}

impl MessageAssembler {
    /// Creates an assembler drawing payload blocks from `pool`.
    pub fn new(pool: BlockPool, max_payload: usize) -> Self {
        Self {
            pool,
            max_payload,
            header_buf: Vec::with_capacity(HEADER_SIZE),
            state: AssembleState::AwaitHeader,
            message: BlockChain::new(),
            meta: None,
        }
    }

    /// Returns `true` while a message or envelope is partially assembled.
    pub fn in_progress(&self) -> bool {
        !self.header_buf.is_empty()
            || !self.message.is_empty()
            || matches!(self.state, AssembleState::AwaitPayload { .. })
    }

    /// Feeds one block of raw input, returning any completed messages.
    ///
    /// The block is consumed and released back to the pool.
    pub fn add_read_data(&mut self, mut block: Block) -> Result<Vec<AssembledMessage>> {
        let mut out = Vec::new();
        let result = self.drain_block(&mut block, &mut out);
        self.pool.release(block);
        if result.is_err() {
            self.discard_partial();
        }
        result.map(|()| out)
    }

    fn drain_block(&mut self, block: &mut Block, out: &mut Vec<AssembledMessage>) -> Result<()> {
        while block.readable() > 0 {
            match &mut self.state {
                AssembleState::AwaitHeader => {
                    let need = HEADER_SIZE - self.header_buf.len();
                    let take = need.min(block.readable());
                    self.header_buf.extend_from_slice(&block.as_slice()[..take]);
                    block.advance(take);

                    if self.header_buf.len() == HEADER_SIZE {
                        self.begin_payload()?;
                        self.try_finish_envelope(out)?;
                    }
                }
                AssembleState::AwaitPayload { remaining, crc, chain, .. } => {
                    let take = (*remaining).min(block.readable());
                    let bytes = &block.as_slice()[..take];
                    crc.update(bytes);
                    append_bytes(&self.pool, chain, bytes);
                    block.advance(take);
                    *remaining -= take;

                    self.try_finish_envelope(out)?;
                }
            }
        }
        Ok(())
    }

    fn begin_payload(&mut self) -> Result<()> {
        let header = EnvelopeHeader::parse(&self.header_buf)?;
        if header.payload_len as usize > self.max_payload {
            return Err(GridError::Protocol(format!(
                "payload length {} exceeds the {} byte envelope bound",
                header.payload_len, self.max_payload
            )));
        }

        let mut crc = crc32fast::Hasher::new();
        crc.update(&self.header_buf[..CHECKSUM_OFFSET]);
        self.header_buf.clear();
        self.state = AssembleState::AwaitPayload {
            remaining: header.payload_len as usize,
            header,
            crc,
            chain: BlockChain::new(),
        };
        Ok(())
    }

    fn try_finish_envelope(&mut self, out: &mut Vec<AssembledMessage>) -> Result<()> {
        let done = matches!(&self.state, AssembleState::AwaitPayload { remaining: 0, .. });
        if !done {
            return Ok(());
        }
        let state = std::mem::replace(&mut self.state, AssembleState::AwaitHeader);
        let AssembleState::AwaitPayload { header, crc, chain, .. } = state else {
            unreachable!("envelope completion outside payload state");
        };

        let computed = crc.finalize();
        if computed != header.checksum {
            return Err(GridError::Protocol(format!(
                "envelope checksum mismatch: expected 0x{:08x}, found 0x{:08x}",
                computed, header.checksum
            )));
        }

        match self.meta {
            None => self.meta = Some((header.message_type, header.session_id)),
            Some((message_type, session_id)) => {
                if message_type != header.message_type || session_id != header.session_id {
                    return Err(GridError::Protocol(
                        "envelope interleaved into a fragmented message".to_string(),
                    ));
                }
                if !header.is_fragment() {
                    return Err(GridError::Protocol(
                        "unfragmented envelope inside a fragmented message".to_string(),
                    ));
                }
            }
        }

        self.message.extend(chain);

        if header.completes_message() {
            let (message_type, session_id) = self.meta.take().expect("message metadata");
            let payload = std::mem::take(&mut self.message);
            trace!(message_type, session_id, len = payload.len(), "assembled message");
            out.push(AssembledMessage {
                message_type,
                session_id,
                payload,
            });
        }
        Ok(())
    }

    fn discard_partial(&mut self) {
        self.header_buf.clear();
        self.state = AssembleState::AwaitHeader;
        std::mem::take(&mut self.message).release_into(&self.pool);
        self.meta = None;
    }
}

impl std::fmt::Debug for MessageAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAssembler")
            .field("max_payload", &self.max_payload)
            .field("in_progress", &self.in_progress())
            .finish()
    }
}

fn append_bytes(pool: &BlockPool, chain: &mut BlockChain, mut bytes: &[u8]) {
    if let Some(tail) = chain.last_mut() {
        let n = bytes.len().min(tail.remaining());
        if n > 0 {
            tail.put_slice(&bytes[..n]);
            bytes = &bytes[n..];
        }
    }
    while !bytes.is_empty() {
        let mut block = pool.acquire();
        let n = bytes.len().min(block.remaining());
        block.put_slice(&bytes[..n]);
        bytes = &bytes[n..];
        chain.push(block);
    }
}
