//! Shared pool of recycled fixed-size blocks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::sync::Notify;

use super::block::Block;

/// Default fixed block size handed out by a pool.
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

/// Default cap on the number of idle cached blocks.
pub const DEFAULT_POOL_CAP: usize = 1024;

struct PoolShared {
    block_size: usize,
    cap: usize,
    limit: Option<usize>,
    closed: AtomicBool,
    referenced: AtomicUsize,
    free: Mutex<Vec<BytesMut>>,
    available: Notify,
}

/// A thread-safe pool of fixed-size byte blocks.
///
/// Acquired blocks count toward `referenced` until they are dropped or
/// released; released blocks with intact storage are recycled onto a LIFO
/// free list bounded by `cap`. An optional `limit` bounds the number of
/// outstanding blocks: [`try_acquire`](Self::try_acquire) refuses above the
/// limit and [`acquire_when_available`](Self::acquire_when_available) waits,
/// which is how connection readers apply back-pressure.
///
/// The pool handle is cheap to clone; all clones share the same free list
/// and counters.
#[derive(Clone)]
pub struct BlockPool {
    shared: Arc<PoolShared>,
}

/// RAII guard carried by pooled blocks; dropping it decrements `referenced`
/// and wakes back-pressure waiters.
#[derive(Debug)]
pub(crate) struct PoolToken {
    shared: Arc<PoolShared>,
}

impl Drop for PoolToken {
    fn drop(&mut self) {
        self.shared.referenced.fetch_sub(1, Ordering::AcqRel);
        self.shared.available.notify_waiters();
    }
}

impl std::fmt::Debug for PoolShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolShared")
            .field("block_size", &self.block_size)
            .field("cap", &self.cap)
            .field("limit", &self.limit)
            .field("referenced", &self.referenced.load(Ordering::Acquire))
            .finish()
    }
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.shared.block_size)
            .field("cached", &self.cached())
            .field("referenced", &self.referenced())
            .finish()
    }
}

impl BlockPool {
    /// Creates a pool of `block_size`-byte blocks caching at most `cap` idle
    /// blocks.
    pub fn new(block_size: usize, cap: usize) -> Self {
        assert!(block_size > 0, "block size must be greater than zero");
        Self {
            shared: Arc::new(PoolShared {
                block_size,
                cap,
                limit: None,
                closed: AtomicBool::new(false),
                referenced: AtomicUsize::new(0),
                free: Mutex::new(Vec::new()),
                available: Notify::new(),
            }),
        }
    }

    /// Creates a pool that additionally bounds the number of outstanding
    /// blocks to `limit`.
    pub fn with_limit(block_size: usize, cap: usize, limit: usize) -> Self {
        assert!(block_size > 0, "block size must be greater than zero");
        assert!(limit > 0, "pool limit must be greater than zero");
        Self {
            shared: Arc::new(PoolShared {
                block_size,
                cap,
                limit: Some(limit),
                closed: AtomicBool::new(false),
                referenced: AtomicUsize::new(0),
                free: Mutex::new(Vec::new()),
                available: Notify::new(),
            }),
        }
    }

    /// Returns the fixed block size.
    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    /// Returns the number of idle cached blocks.
    pub fn cached(&self) -> usize {
        self.shared.free.lock().unwrap().len()
    }

    /// Returns the number of blocks currently outstanding to callers.
    pub fn referenced(&self) -> usize {
        self.shared.referenced.load(Ordering::Acquire)
    }

    /// Acquires a block, recycling a cached one when available.
    ///
    /// This never fails while the process can allocate; the outstanding
    /// `limit` is enforced only by [`try_acquire`](Self::try_acquire) and
    /// [`acquire_when_available`](Self::acquire_when_available).
    pub fn acquire(&self) -> Block {
        let storage = self
            .shared
            .free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.shared.block_size));
        self.shared.referenced.fetch_add(1, Ordering::AcqRel);
        Block::pooled(
            storage,
            self.shared.block_size,
            PoolToken {
                shared: Arc::clone(&self.shared),
            },
        )
    }

    /// Acquires a block of an arbitrary size.
    ///
    /// Sizes matching the pool's fixed block size are served from the cache;
    /// other sizes are freshly allocated and will be discarded rather than
    /// recycled on release. Either way the block counts toward `referenced`.
    pub fn acquire_sized(&self, size: usize) -> Block {
        if size == self.shared.block_size {
            return self.acquire();
        }
        self.shared.referenced.fetch_add(1, Ordering::AcqRel);
        Block::pooled(
            BytesMut::with_capacity(size),
            size,
            PoolToken {
                shared: Arc::clone(&self.shared),
            },
        )
    }

    /// Acquires a block unless the outstanding limit has been reached.
    pub fn try_acquire(&self) -> Option<Block> {
        if self.at_limit() {
            return None;
        }
        Some(self.acquire())
    }

    /// Acquires a block, waiting until the pool is below its outstanding
    /// limit. Pools without a limit never wait.
    pub async fn acquire_when_available(&self) -> Block {
        let notified = self.shared.available.notified();
        tokio::pin!(notified);
        loop {
            if !self.at_limit() {
                return self.acquire();
            }
            notified.as_mut().enable();
            if !self.at_limit() {
                return self.acquire();
            }
            notified.as_mut().await;
            notified.set(self.shared.available.notified());
        }
    }

    /// Releases a block back to the pool.
    ///
    /// Storage is recycled when the block still owns its full fixed-size
    /// allocation and the cache is below its cap; otherwise the block is
    /// discarded. Either way the `referenced` count drops.
    pub fn release(&self, block: Block) {
        let (mut data, token) = block.into_storage();
        if !self.shared.closed.load(Ordering::Acquire) {
            data.clear();
            if data.try_reclaim(self.shared.block_size) {
                let mut free = self.shared.free.lock().unwrap();
                if free.len() < self.shared.cap {
                    free.push(data);
                }
            }
        }
        drop(token);
    }

    /// Drops all cached blocks. Releases beyond this point simply discard.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.free.lock().unwrap().clear();
        self.shared.available.notify_waiters();
    }

    fn at_limit(&self) -> bool {
        match self.shared.limit {
            Some(limit) => self.referenced() >= limit,
            None => false,
        }
    }
}
