//! A pooled fixed-capacity byte region.

use bytes::buf::Limit;
use bytes::{Buf, BufMut, BytesMut};

use super::pool::PoolToken;

/// A contiguous byte region with a fixed capacity.
///
/// A block is written at the back (`put_u8`, `put_slice`) up to its capacity
/// and consumed from the front (`advance`, `split_to`). Blocks acquired from
/// a [`super::BlockPool`] carry a token that keeps the pool's `referenced`
/// counter accurate on every exit path: dropping the block decrements the
/// counter, releasing it back to the pool additionally recycles the storage.
///
/// A block must not be mutated once it has been enqueued for transmission;
/// the write path only consumes from the front.
#[derive(Debug)]
pub struct Block {
    data: BytesMut,
    capacity: usize,
    token: Option<PoolToken>,
}

impl Block {
    /// Creates an unpooled block with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            token: None,
        }
    }

    /// Creates a block that carries pooled content.
    pub(crate) fn pooled(data: BytesMut, capacity: usize, token: PoolToken) -> Self {
        Self {
            data,
            capacity,
            token: Some(token),
        }
    }

    /// Returns the fixed capacity of this block.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of readable bytes.
    pub fn readable(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the block holds no readable bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the remaining write headroom.
    ///
    /// Only meaningful while the block is being filled; consuming from the
    /// front does not reopen headroom.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// Returns `true` if more bytes can be appended.
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Appends a single byte.
    ///
    /// Panics if the block is full; callers bound their writes by
    /// [`remaining`](Self::remaining).
    pub fn put_u8(&mut self, b: u8) {
        assert!(self.has_remaining(), "block overflow");
        self.data.put_u8(b);
    }

    /// Appends a slice of bytes.
    ///
    /// Panics if the slice exceeds the remaining headroom.
    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(src.len() <= self.remaining(), "block overflow");
        self.data.put_slice(src);
    }

    /// Returns the readable bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the readable bytes mutably, for in-place back-patching.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consumes the first `n` readable bytes.
    pub fn advance(&mut self, n: usize) {
        self.data.advance(n);
    }

    /// Splits off the first `n` readable bytes into a new block.
    ///
    /// The split is zero-copy; both halves view the same allocation. The pool
    /// token stays with `self`, so each pool acquisition is counted exactly
    /// once no matter how many views exist.
    pub fn split_to(&mut self, n: usize) -> Block {
        Block {
            data: self.data.split_to(n),
            capacity: n,
            token: None,
        }
    }

    /// Clears all readable bytes, resetting the block for refill.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Returns a bounded write view over the unfilled region, suitable for
    /// vectored socket reads (`AsyncReadExt::read_buf`).
    pub fn unfilled(&mut self) -> Limit<&mut BytesMut> {
        let headroom = self.remaining();
        (&mut self.data).limit(headroom)
    }

    /// Decomposes the block into its storage and pool token.
    pub(crate) fn into_storage(self) -> (BytesMut, Option<PoolToken>) {
        (self.data, self.token)
    }
}
