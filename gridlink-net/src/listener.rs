//! Server sockets accepting transport connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use gridlink_core::error::Result;
use gridlink_core::protocol::MessageSink;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::manager::ManagerShared;

/// Produces a fresh message sink for each accepted connection.
pub trait AdaptorFactory: Send + Sync {
    /// Called once per accepted connection, before its I/O starts.
    fn create_sink(&self, connection: &Connection) -> Box<dyn MessageSink>;
}

impl<F> AdaptorFactory for F
where
    F: Fn(&Connection) -> Box<dyn MessageSink> + Send + Sync,
{
    fn create_sink(&self, connection: &Connection) -> Box<dyn MessageSink> {
        self(connection)
    }
}

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct ListenerShared {
    id: ListenerId,
    local_addr: SocketAddr,
    manager: Weak<ManagerShared>,
    stop: watch::Sender<bool>,
    accepted: Mutex<Vec<Connection>>,
}

/// A bound server socket producing connections on accept.
///
/// Lives from bind to [`stop`](Self::stop). Stopping halts the accept loop;
/// connections it accepted stay open unless closed explicitly via
/// [`stop_and_close_accepted`](Self::stop_and_close_accepted).
#[derive(Clone)]
pub struct Listener {
    shared: Arc<ListenerShared>,
}

impl Listener {
    pub(crate) fn bind(
        manager: &Arc<ManagerShared>,
        addr: SocketAddr,
        factory: Arc<dyn AdaptorFactory>,
        backlog: u32,
        reuse_addr: bool,
    ) -> Result<Self> {
        let socket = bind_socket(addr, backlog, reuse_addr).map_err(|e| {
            warn!(address = %addr, error = %e, "unable to bind listener socket");
            e
        })?;
        let listener = TcpListener::from_std(socket)?;
        let local_addr = listener.local_addr()?;
        debug!(address = %local_addr, "listener bound");

        let (stop, _) = watch::channel(false);
        let shared = Arc::new(ListenerShared {
            id: ListenerId::next(),
            local_addr,
            manager: Arc::downgrade(manager),
            stop,
            accepted: Mutex::new(Vec::new()),
        });

        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            accept_loop(task_shared, listener, factory).await;
        });

        Ok(Self { shared })
    }

    /// Returns this listener's identifier.
    pub fn id(&self) -> ListenerId {
        self.shared.id
    }

    /// Returns the bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Returns the number of connections this listener has accepted.
    pub fn accepted_count(&self) -> usize {
        self.shared.accepted.lock().unwrap().len()
    }

    /// Stops accepting connections and deregisters from the manager.
    ///
    /// Connections already accepted stay open.
    pub fn stop(&self) {
        let _ = self.shared.stop.send(true);
        if let Some(manager) = self.shared.manager.upgrade() {
            manager.remove_listener(self.shared.id);
        }
        debug!(address = %self.shared.local_addr, "listener stopped");
    }

    /// Stops accepting and gracefully closes every accepted connection.
    pub async fn stop_and_close_accepted(&self, timeout: Duration) {
        self.stop();
        let accepted: Vec<Connection> = self.shared.accepted.lock().unwrap().drain(..).collect();
        for conn in accepted {
            let _ = conn.close(timeout).await;
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.shared.id)
            .field("local_addr", &self.shared.local_addr)
            .finish()
    }
}

fn bind_socket(addr: SocketAddr, backlog: u32, reuse_addr: bool) -> std::io::Result<std::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(reuse_addr)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

async fn accept_loop(
    shared: Arc<ListenerShared>,
    listener: TcpListener,
    factory: Arc<dyn AdaptorFactory>,
) {
    let mut stop = shared.stop.subscribe();
    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = stop.wait_for(|s| *s) => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                let Some(manager) = shared.manager.upgrade() else {
                    break;
                };
                match manager.register_accepted(factory.as_ref()) {
                    Ok(conn) => {
                        debug!(listener = %shared.local_addr, peer = %peer, id = %conn.id(), "accepted connection");
                        conn.open_accepted(stream, peer);
                        shared.accepted.lock().unwrap().push(conn);
                    }
                    Err(e) => {
                        // Manager shut down under us; stop accepting.
                        debug!(error = %e, "dropping accepted socket");
                        break;
                    }
                }
            }
            Err(e) => {
                // One bad accept must not kill the loop.
                warn!(listener = %shared.local_addr, error = %e, "accept failed");
            }
        }
    }
    debug!(address = %shared.local_addr, "accept loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_ids_unique() {
        assert_ne!(ListenerId::next(), ListenerId::next());
    }

    #[test]
    fn test_bind_socket_reuse_addr() {
        let listener = bind_socket("127.0.0.1:0".parse().unwrap(), 8, true).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_socket_rejects_in_use_port_without_reuse() {
        let first = bind_socket("127.0.0.1:0".parse().unwrap(), 8, false).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(bind_socket(addr, 8, false).is_err());
    }
}
