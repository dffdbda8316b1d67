//! Connection lifecycle events.

use std::net::SocketAddr;

use gridlink_core::error::GridError;

use crate::connection::ConnectionId;

/// Events emitted during connection lifecycle.
///
/// Delivered through the manager's broadcast channel; events for a given
/// connection are serialized on its owning worker and ordered with respect
/// to its I/O.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection reached the open state.
    Connected {
        /// The connection identifier.
        id: ConnectionId,
        /// The remote address.
        address: SocketAddr,
    },
    /// A connection reached the closed state.
    Closed {
        /// The connection identifier.
        id: ConnectionId,
        /// The remote address, if the connection ever opened.
        address: Option<SocketAddr>,
    },
    /// The peer closed its end of the stream.
    Eof {
        /// The connection identifier.
        id: ConnectionId,
    },
    /// An error occurred on the connection; an asynchronous close follows.
    Error {
        /// The connection identifier.
        id: ConnectionId,
        /// The underlying error; its kind distinguishes protocol faults
        /// from I/O faults.
        error: GridError,
    },
}

impl ConnectionEvent {
    /// Returns the id of the connection this event concerns.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Connected { id, .. }
            | Self::Closed { id, .. }
            | Self::Eof { id }
            | Self::Error { id, .. } => *id,
        }
    }
}
