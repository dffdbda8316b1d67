//! Core types for the Gridlink transport: pooled buffers, block chains,
//! typed stream serialization, and the wire protocol.
//!
//! The transport moves logical messages between peers over ordered byte
//! streams. This crate contains everything below the socket:
//!
//! - [`buffer`] — fixed-size pooled [`Block`](buffer::Block)s and ordered
//!   [`BlockChain`](buffer::BlockChain)s, with observable pool accounting.
//! - [`io`] — the scatter [`ChainWriter`](io::ChainWriter) with back-patching
//!   marks, and the matching [`ChainReader`](io::ChainReader).
//! - [`protocol`] — the envelope wire format, the
//!   [`frame_message`](protocol::frame_message) send packer, the
//!   [`MessageAssembler`](protocol::MessageAssembler) receive state machine,
//!   and the [`Message`](protocol::Message) name/value codec.
//!
//! Networking (connections, listeners, the worker pool, and the connection
//! manager) lives in the `gridlink-net` crate.

#![warn(missing_docs)]

pub mod buffer;
pub mod error;
pub mod io;
pub mod protocol;

pub use buffer::{Block, BlockChain, BlockPool};
pub use error::{FaultKind, GridError, Result};
pub use protocol::{Message, MessageSink, NvValue};
