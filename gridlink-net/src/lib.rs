//! Non-blocking connection management for the Gridlink transport.
//!
//! This crate multiplexes many connections over a small worker pool and
//! drives the wire protocol from `gridlink-core` across real sockets.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gridlink_core::buffer::BlockChain;
//! use gridlink_core::protocol::MessageSink;
//! use gridlink_net::{Connection, TransportConfig, TransportManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TransportManager::new(TransportConfig::default());
//!
//!     // Server: echo every message back on its connection.
//!     let listener = manager.create_listener(
//!         "127.0.0.1:0".parse()?,
//!         Arc::new(|conn: &Connection| {
//!             let conn = conn.clone();
//!             Box::new(move |ty: u8, session: u64, payload: BlockChain| {
//!                 let _ = conn.send_chain(ty, session, payload);
//!             }) as Box<dyn MessageSink>
//!         }),
//!     )?;
//!
//!     // Client: print whatever comes back.
//!     let sink = Box::new(|ty: u8, session: u64, payload: BlockChain| {
//!         println!("got type {} session {} ({} bytes)", ty, session, payload.len());
//!     });
//!     let conn = manager.open_connection(listener.local_addr(), sink).await?;
//!     conn.send_chain(1, 1, BlockChain::new())?.wait().await?;
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! - Writes on one connection are strictly FIFO on the wire.
//! - Receive dispatch on one connection is strictly in arrival order.
//! - Events and completions for a connection are serialized on its worker.
//! - Closing a connection fails its pending writes with their completions;
//!   shutting the manager down does so for every connection.

#![warn(missing_docs)]

mod comm;
mod config;
mod connection;
mod events;
mod listener;
mod manager;
mod transform;

pub use comm::WorkerState;
pub use config::{TransportConfig, TransportConfigBuilder};
pub use connection::{ConnState, Connection, ConnectionId, ConnectionSummary, WriteCompletion};
pub use events::ConnectionEvent;
pub use listener::{AdaptorFactory, Listener, ListenerId};
pub use manager::{ManagerState, TransportManager};
pub use transform::{BufferTransform, BufferTransformFactory, ClearText, ClearTextFactory};
