//! Buffer transforms wrapped around raw socket I/O.
//!
//! A transform sits between the framer and the socket, rewriting outgoing
//! chains and incoming blocks. TLS termination plugs in here; the transport
//! itself ships only the identity transform.

use gridlink_core::buffer::{Block, BlockChain};
use gridlink_core::error::Result;

/// Rewrites bytes crossing the socket boundary for one connection.
pub trait BufferTransform: Send {
    /// Transforms an outgoing wire chain before it is written.
    fn wrap_write(&mut self, chain: BlockChain) -> Result<BlockChain>;

    /// Transforms a block read from the socket before it reaches the framer.
    fn unwrap_read(&mut self, block: Block) -> Result<Block>;
}

/// Produces a fresh [`BufferTransform`] per connection.
pub trait BufferTransformFactory: Send + Sync {
    /// Creates the transform for a new connection.
    fn create(&self) -> Box<dyn BufferTransform>;

    /// Short description shown in the manager's state snapshot.
    fn summary(&self) -> String;
}

/// The identity transform: bytes pass through untouched.
#[derive(Debug, Default)]
pub struct ClearText;

impl BufferTransform for ClearText {
    fn wrap_write(&mut self, chain: BlockChain) -> Result<BlockChain> {
        Ok(chain)
    }

    fn unwrap_read(&mut self, block: Block) -> Result<Block> {
        Ok(block)
    }
}

/// Factory for the identity transform.
#[derive(Debug, Default)]
pub struct ClearTextFactory;

impl BufferTransformFactory for ClearTextFactory {
    fn create(&self) -> Box<dyn BufferTransform> {
        Box::new(ClearText)
    }

    fn summary(&self) -> String {
        "clear-text".to_string()
    }
}
