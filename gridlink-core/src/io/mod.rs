//! Typed reading and writing over block chains.

mod reader;
mod writer;

pub use reader::ChainReader;
pub use writer::{ChainWriter, Mark, DEFAULT_INITIAL_BLOCK_SIZE, DEFAULT_MAX_BLOCK_SIZE};
