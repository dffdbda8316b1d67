//! The connection manager: owns the reactor, connections, listeners, and
//! the buffer pool.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gridlink_core::buffer::BlockPool;
use gridlink_core::error::{GridError, Result};
use gridlink_core::protocol::MessageSink;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::comm::{Comm, WorkerState};
use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionRegistry, ConnectionSummary};
use crate::events::ConnectionEvent;
use crate::listener::{AdaptorFactory, Listener, ListenerId};
use crate::transform::{BufferTransformFactory, ClearTextFactory};

pub(crate) struct ManagerShared {
    config: TransportConfig,
    pool: BlockPool,
    comm: Comm,
    connections: Arc<ConnectionRegistry>,
    listeners: Mutex<Vec<Listener>>,
    events: broadcast::Sender<ConnectionEvent>,
    transform_factory: Arc<dyn BufferTransformFactory>,
    shutdown: AtomicBool,
}

impl ManagerShared {
    fn check_shutdown(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            Err(GridError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn new_connection(&self) -> Connection {
        let conn = Connection::new(
            self.pool.clone(),
            self.comm.worker_for_new_connection(),
            self.events.clone(),
            Arc::downgrade(&self.connections),
            self.config.max_payload(),
            self.config.connect_timeout(),
            self.config.close_timeout(),
            self.transform_factory.create(),
        );
        self.connections.lock().unwrap().insert(conn.id(), conn.clone());
        conn
    }

    pub(crate) fn register_accepted(&self, factory: &dyn AdaptorFactory) -> Result<Connection> {
        self.check_shutdown()?;
        let conn = self.new_connection();
        conn.install_sink(factory.create_sink(&conn));
        Ok(conn)
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|l| l.id() != id);
    }
}

/// Observable snapshot of the whole transport.
#[derive(Debug, Clone)]
pub struct ManagerState {
    /// Summaries of all live connections.
    pub connections: Vec<ConnectionSummary>,
    /// Per-worker load and throughput.
    pub workers: Vec<WorkerState>,
    /// Idle blocks cached by the pool.
    pub buffers_cached: usize,
    /// Blocks outstanding to streams, connections, and sinks.
    pub buffers_referenced: usize,
    /// Description of the buffer-transform factory.
    pub transform: String,
}

/// Owns the worker pool, the connection set, the listener set, and the
/// buffer pool; the single entry point of the transport.
///
/// The handle is cheap to clone. [`shutdown`](Self::shutdown) is a one-shot:
/// afterwards every factory method fails with [`GridError::Shutdown`].
#[derive(Clone)]
pub struct TransportManager {
    shared: Arc<ManagerShared>,
}

impl TransportManager {
    /// Creates a manager with the identity buffer transform.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_transform(config, Arc::new(ClearTextFactory))
    }

    /// Creates a manager with a custom buffer-transform factory.
    pub fn with_transform(
        config: TransportConfig,
        transform_factory: Arc<dyn BufferTransformFactory>,
    ) -> Self {
        let pool = match config.pool_limit() {
            Some(limit) => {
                BlockPool::with_limit(config.pool_block_size(), config.buffer_pool_cap(), limit)
            }
            None => BlockPool::new(config.pool_block_size(), config.buffer_pool_cap()),
        };
        let (events, _) = broadcast::channel(64);
        let comm = Comm::new(config.worker_count());
        info!(
            workers = config.worker_count(),
            block_size = config.pool_block_size(),
            "transport manager started"
        );
        Self {
            shared: Arc::new(ManagerShared {
                config,
                pool,
                comm,
                connections: Arc::new(Mutex::new(Default::default())),
                listeners: Mutex::new(Vec::new()),
                events,
                transform_factory,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Returns the shared buffer pool.
    pub fn pool(&self) -> &BlockPool {
        &self.shared.pool
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Creates an unconnected outbound connection with the given sink.
    pub fn create_connection(&self, sink: Box<dyn MessageSink>) -> Result<Connection> {
        self.shared.check_shutdown()?;
        let conn = self.shared.new_connection();
        conn.install_sink(sink);
        Ok(conn)
    }

    /// Creates a connection and connects it to `addr`.
    pub async fn open_connection(
        &self,
        addr: SocketAddr,
        sink: Box<dyn MessageSink>,
    ) -> Result<Connection> {
        let conn = self.create_connection(sink)?;
        conn.connect(addr).await?;
        Ok(conn)
    }

    /// Binds a listener with the configured backlog and reuse-address flag.
    pub fn create_listener(
        &self,
        addr: SocketAddr,
        factory: Arc<dyn AdaptorFactory>,
    ) -> Result<Listener> {
        self.create_listener_with(
            addr,
            factory,
            self.shared.config.accept_backlog(),
            self.shared.config.reuse_addr(),
        )
    }

    /// Binds a listener with an explicit backlog and reuse-address flag.
    pub fn create_listener_with(
        &self,
        addr: SocketAddr,
        factory: Arc<dyn AdaptorFactory>,
        backlog: u32,
        reuse_addr: bool,
    ) -> Result<Listener> {
        self.shared.check_shutdown()?;
        let listener = Listener::bind(&self.shared, addr, factory, backlog, reuse_addr)?;
        self.shared.listeners.lock().unwrap().push(listener.clone());
        Ok(listener)
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().unwrap().len()
    }

    /// Returns the number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().unwrap().len()
    }

    /// Gracefully closes every current connection, each bounded by `timeout`.
    pub async fn close_all_connections(&self, timeout: Duration) {
        let snapshot: Vec<Connection> = self
            .shared
            .connections
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        debug!(count = snapshot.len(), "closing all connections");
        for conn in snapshot {
            let _ = conn.close(timeout).await;
        }
    }

    /// Schedules an asynchronous close of every current connection.
    pub fn close_all_connections_async(&self) {
        let snapshot: Vec<Connection> = self
            .shared
            .connections
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        debug!(count = snapshot.len(), "async-closing all connections");
        for conn in snapshot {
            conn.close_async();
        }
    }

    /// Stops every listener.
    pub fn close_all_listeners(&self) {
        let snapshot: Vec<Listener> = self.shared.listeners.lock().unwrap().clone();
        for listener in snapshot {
            listener.stop();
        }
    }

    /// Shuts the transport down: stops listeners, asynchronously closes
    /// connections, drops the buffer pool cache, and stops the workers.
    ///
    /// Idempotent; factory methods fail with [`GridError::Shutdown`] from
    /// the first call onwards.
    pub async fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("transport manager shutting down");
        self.close_all_listeners();
        self.close_all_connections_async();
        self.shared.pool.close();
        self.shared.comm.stop();
    }

    /// Returns an observable snapshot of connections, workers, and buffers.
    pub fn state(&self) -> ManagerState {
        let connections = self
            .shared
            .connections
            .lock()
            .unwrap()
            .values()
            .map(Connection::summary)
            .collect();
        ManagerState {
            connections,
            workers: self.shared.comm.state(),
            buffers_cached: self.shared.pool.cached(),
            buffers_referenced: self.shared.pool.referenced(),
            transform: self.shared.transform_factory.summary(),
        }
    }
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("connections", &self.connection_count())
            .field("listeners", &self.listener_count())
            .field("shutdown", &self.shared.shutdown.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnState;
    use gridlink_core::buffer::{Block, BlockChain};
    use gridlink_core::io::ChainWriter;
    use gridlink_core::protocol::constants::HEADER_SIZE;
    use gridlink_core::protocol::{frame_message, Message, NvValue};
    use rand::Rng;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    type Received = (u8, u64, Vec<u8>);

    /// Adaptor factory capturing every message into a channel.
    fn collector() -> (Arc<dyn AdaptorFactory>, mpsc::UnboundedReceiver<Received>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory: Arc<dyn AdaptorFactory> = Arc::new(move |_conn: &Connection| {
            let tx = tx.clone();
            Box::new(move |message_type: u8, session_id: u64, payload: BlockChain| {
                let _ = tx.send((message_type, session_id, payload.into_bytes()));
            }) as Box<dyn MessageSink>
        });
        (factory, rx)
    }

    /// Adaptor factory echoing every message back on its connection.
    fn echo() -> Arc<dyn AdaptorFactory> {
        Arc::new(|conn: &Connection| {
            let conn = conn.clone();
            Box::new(move |message_type: u8, session_id: u64, payload: BlockChain| {
                let _ = conn.send_chain(message_type, session_id, payload);
            }) as Box<dyn MessageSink>
        })
    }

    /// Sink for client connections collecting into a channel.
    fn collecting_sink() -> (Box<dyn MessageSink>, mpsc::UnboundedReceiver<Received>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Box::new(move |message_type: u8, session_id: u64, payload: BlockChain| {
            let _ = tx.send((message_type, session_id, payload.into_bytes()));
        }) as Box<dyn MessageSink>;
        (sink, rx)
    }

    fn chain_of(pool: &BlockPool, bytes: &[u8]) -> BlockChain {
        let mut w = ChainWriter::new(pool.clone());
        w.write_bytes(bytes);
        w.into_chain()
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("sink channel closed")
    }

    fn any_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_manager_creation_and_state() {
        let manager = TransportManager::new(TransportConfig::default());
        let state = manager.state();
        assert!(state.connections.is_empty());
        assert!(state.workers.is_empty());
        assert_eq!(state.buffers_referenced, 0);
        assert_eq!(state.transform, "clear-text");
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let manager = TransportManager::new(TransportConfig::default());
        let listener = manager.create_listener(any_addr(), echo()).unwrap();

        let (sink, mut rx) = collecting_sink();
        let conn = manager
            .open_connection(listener.local_addr(), sink)
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnState::Open);

        let payload = b"ping across the wire".to_vec();
        let completion = conn
            .send_chain(7, 42, chain_of(manager.pool(), &payload))
            .unwrap();
        completion.wait().await.unwrap();

        let (message_type, session_id, echoed) = recv(&mut rx).await;
        assert_eq!(message_type, 7);
        assert_eq!(session_id, 42);
        assert_eq!(echoed, payload);
        assert!(conn.bytes_out() > 0);
        assert!(conn.bytes_in() > 0);
    }

    #[tokio::test]
    async fn test_logical_message_roundtrip_over_wire() {
        let manager = TransportManager::new(TransportConfig::default());
        let (factory, mut rx) = collector();
        let listener = manager.create_listener(any_addr(), factory).unwrap();

        let (sink, _keep) = collecting_sink();
        let conn = manager
            .open_connection(listener.local_addr(), sink)
            .await
            .unwrap();

        let message = Message::new(9, 1234)
            .with(1, NvValue::Bool(true))
            .with(2, NvValue::I32(0x11223344))
            .with(3, NvValue::Str("hello".to_string()));
        conn.send(message).unwrap().wait().await.unwrap();

        let (message_type, session_id, body) = recv(&mut rx).await;
        assert_eq!(message_type, 9);
        assert_eq!(session_id, 1234);

        let mut block = Block::with_capacity(body.len().max(1));
        block.put_slice(&body);
        let decoded = Message::decode(message_type, session_id, BlockChain::with_block(block)).unwrap();
        assert_eq!(decoded.get(1), Some(&NvValue::Bool(true)));
        assert_eq!(decoded.get(2), Some(&NvValue::I32(0x11223344)));
        assert_eq!(decoded.get(3), Some(&NvValue::Str("hello".to_string())));
    }

    #[tokio::test]
    async fn test_random_messages_echo_in_order() {
        let manager = TransportManager::new(TransportConfig::default());
        let listener = manager.create_listener(any_addr(), echo()).unwrap();

        let (sink, mut rx) = collecting_sink();
        let conn = manager
            .open_connection(listener.local_addr(), sink)
            .await
            .unwrap();

        let mut rng = rand::thread_rng();
        let mut sent = Vec::new();
        let mut bytes_sent = 0usize;
        for i in 0..100u64 {
            // A chain of 0..15 blocks, each 0..500 random bytes.
            let mut payload = Vec::new();
            for _ in 0..rng.gen_range(0..15) {
                let len = rng.gen_range(0..500);
                payload.extend((0..len).map(|_| rng.gen::<u8>()));
            }
            bytes_sent += payload.len();
            conn.send_chain(1, i, chain_of(manager.pool(), &payload)).unwrap();
            sent.push(payload);
        }

        let mut bytes_received = 0usize;
        for (i, expected) in sent.iter().enumerate() {
            let (_, session_id, payload) = recv(&mut rx).await;
            // FIFO: message i arrives strictly before message i + 1.
            assert_eq!(session_id, i as u64);
            assert_eq!(&payload, expected);
            bytes_received += payload.len();
        }
        assert_eq!(bytes_sent, bytes_received);
    }

    #[tokio::test]
    async fn test_two_connections_interleaved_large_sends() {
        let manager = TransportManager::new(TransportConfig::default());
        let listener = manager.create_listener(any_addr(), echo()).unwrap();

        let (sink_a, mut rx_a) = collecting_sink();
        let (sink_b, mut rx_b) = collecting_sink();
        let conn_a = manager.open_connection(listener.local_addr(), sink_a).await.unwrap();
        let conn_b = manager.open_connection(listener.local_addr(), sink_b).await.unwrap();

        let payload_a: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 255) as u8).collect();
        let payload_b: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 253) as u8).collect();

        let done_a = conn_a.send_chain(1, 1, chain_of(manager.pool(), &payload_a)).unwrap();
        let done_b = conn_b.send_chain(2, 2, chain_of(manager.pool(), &payload_b)).unwrap();
        done_a.wait().await.unwrap();
        done_b.wait().await.unwrap();

        let (_, _, echoed_a) = timeout(Duration::from_secs(30), rx_a.recv()).await.unwrap().unwrap();
        let (_, _, echoed_b) = timeout(Duration::from_secs(30), rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(echoed_a, payload_a);
        assert_eq!(echoed_b, payload_b);

        // Quiescence: after closing everything, no block stays referenced.
        manager.close_all_connections(Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.pool().referenced(), 0);
    }

    #[tokio::test]
    async fn test_fragments_observed_on_the_wire() {
        use gridlink_core::protocol::EnvelopeHeader;
        use tokio::io::AsyncReadExt;

        let max_payload = 4096usize;
        let config = TransportConfig::builder().max_payload(max_payload).build().unwrap();
        let manager = TransportManager::new(config);

        // A raw peer observing envelopes directly.
        let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = raw.local_addr().unwrap();
        let observer = tokio::spawn(async move {
            let (mut stream, _) = raw.accept().await.unwrap();
            let mut headers = Vec::new();
            while headers.len() < 3 {
                let mut header_bytes = [0u8; HEADER_SIZE];
                stream.read_exact(&mut header_bytes).await.unwrap();
                let header = EnvelopeHeader::parse(&header_bytes).unwrap();
                let mut payload = vec![0u8; header.payload_len as usize];
                stream.read_exact(&mut payload).await.unwrap();
                headers.push(header);
            }
            headers
        });

        let (sink, _keep) = collecting_sink();
        let conn = manager.open_connection(addr, sink).await.unwrap();

        // payload length = 2 * P + 37 must produce exactly three envelopes.
        let payload = vec![0x5Au8; 2 * max_payload + 37];
        conn.send_chain(3, 9, chain_of(manager.pool(), &payload))
            .unwrap()
            .wait()
            .await
            .unwrap();

        let headers = timeout(WAIT, observer).await.unwrap().unwrap();
        assert!(headers[0].is_fragment() && !headers[0].is_end());
        assert!(headers[1].is_fragment() && !headers[1].is_end());
        assert!(headers[2].is_fragment() && headers[2].is_end());
        assert_eq!(headers[0].payload_len as usize, max_payload);
        assert_eq!(headers[2].payload_len, 37);
    }

    #[tokio::test]
    async fn test_corrupt_checksum_closes_connection_without_dispatch() {
        use tokio::io::AsyncWriteExt;

        let max_payload = 32usize;
        let config = TransportConfig::builder().max_payload(max_payload).build().unwrap();
        let manager = TransportManager::new(config);
        let (factory, mut rx) = collector();
        let listener = manager.create_listener(any_addr(), factory).unwrap();
        let mut events = manager.subscribe();

        // Build a four-envelope message and corrupt a byte inside envelope #2.
        let scratch = BlockPool::new(1024, 8);
        let wire = frame_message(&scratch, 1, 7, chain_of(&scratch, &vec![9u8; 4 * max_payload]), max_payload);
        let mut bytes = wire.into_bytes();
        bytes[2 * HEADER_SIZE + max_payload + 3] ^= 0xFF;

        let mut raw = tokio::net::TcpStream::connect(listener.local_addr()).await.unwrap();
        raw.write_all(&bytes).await.unwrap();

        // The receiver closes the connection with a protocol-fault error.
        let error = loop {
            let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
            if let ConnectionEvent::Error { error, .. } = event {
                break error;
            }
        };
        assert!(error.is_protocol_fault());

        // Envelope #1 was delivered to nothing: the partial message is gone.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_eof_event_on_peer_close() {
        let manager = TransportManager::new(TransportConfig::default());
        let (factory, _rx) = collector();
        let listener = manager.create_listener(any_addr(), factory).unwrap();
        let mut events = manager.subscribe();

        let raw = tokio::net::TcpStream::connect(listener.local_addr()).await.unwrap();
        drop(raw);

        let saw_eof = loop {
            let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
            if matches!(event, ConnectionEvent::Eof { .. }) {
                break true;
            }
        };
        assert!(saw_eof);
    }

    #[tokio::test]
    async fn test_shutdown_fails_outstanding_writes_within_bound() {
        let manager = TransportManager::new(TransportConfig::default());

        // A peer that accepts but never reads, so the socket fills up.
        let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = raw.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (stream, _) = raw.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let (sink, _keep) = collecting_sink();
        let conn = manager.open_connection(addr, sink).await.unwrap();

        let payload = vec![0u8; 64 * 1024];
        let mut completions = Vec::with_capacity(1000);
        for i in 0..1000u64 {
            completions.push(conn.send_chain(1, i, chain_of(manager.pool(), &payload)).unwrap());
        }

        manager.shutdown().await;

        // Every completion fires within 500 ms, success or "connection closed".
        let drain = async {
            for completion in completions {
                match completion.wait().await {
                    Ok(()) => {}
                    Err(GridError::Closed(_)) => {}
                    Err(other) => panic!("unexpected completion error: {}", other),
                }
            }
        };
        timeout(Duration::from_millis(500), drain)
            .await
            .expect("completions did not fire within 500ms");
        hold.abort();
    }

    #[tokio::test]
    async fn test_backpressure_bounded_by_pool_limit() {
        let limit = 8usize;
        let config = TransportConfig::builder()
            .pool_block_size(1024)
            .pool_limit(limit)
            .max_payload(1024)
            .build()
            .unwrap();
        let server = TransportManager::new(config);

        // A sink that parks every chain, keeping its blocks referenced.
        let parked = Arc::new(Mutex::new(Vec::new()));
        let parked_in_sink = Arc::clone(&parked);
        let factory: Arc<dyn AdaptorFactory> = Arc::new(move |_conn: &Connection| {
            let parked = Arc::clone(&parked_in_sink);
            Box::new(move |_t: u8, _s: u64, payload: BlockChain| {
                parked.lock().unwrap().push(payload);
            }) as Box<dyn MessageSink>
        });
        let listener = server.create_listener(any_addr(), factory).unwrap();

        let client = TransportManager::new(TransportConfig::default());
        let (sink, _keep) = collecting_sink();
        let conn = client.open_connection(listener.local_addr(), sink).await.unwrap();

        for i in 0..200u64 {
            conn.send_chain(1, i, chain_of(client.pool(), &[7u8; 800])).unwrap();
        }

        // The receiver stays pinned near the pool limit: at most the limit
        // plus the read block and chain block in flight.
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(server.pool().referenced() <= limit + 2);
        }

        // Releasing the parked chains lets the remaining messages flow.
        let release_pool = server.pool().clone();
        let drain = async {
            let mut drained = 0usize;
            while drained < 200 {
                let chains: Vec<BlockChain> = parked.lock().unwrap().drain(..).collect();
                drained += chains.len();
                for chain in chains {
                    chain.release_into(&release_pool);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        timeout(Duration::from_secs(10), drain)
            .await
            .expect("messages did not flow after releasing the parked chains");
    }

    #[tokio::test]
    async fn test_close_with_pending_writes_completes_them() {
        let manager = TransportManager::new(TransportConfig::default());
        let listener = manager.create_listener(any_addr(), echo()).unwrap();

        let (sink, _keep) = collecting_sink();
        let conn = manager.open_connection(listener.local_addr(), sink).await.unwrap();

        // Exactly one pending write, then a graceful close drains it.
        let completion = conn.send_chain(1, 1, chain_of(manager.pool(), &[1u8; 128])).unwrap();
        conn.close(Duration::from_secs(1)).await.unwrap();
        completion.wait().await.unwrap();
        assert_eq!(conn.state(), ConnState::Closed);

        // Close with an empty queue is immediate, and double close is a no-op.
        conn.close_graceful().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_one_shot() {
        let manager = TransportManager::new(TransportConfig::default());
        let listener = manager.create_listener(any_addr(), echo()).unwrap();
        assert_eq!(manager.listener_count(), 1);

        manager.shutdown().await;
        manager.shutdown().await;

        assert_eq!(manager.listener_count(), 0);
        assert!(matches!(
            manager.create_listener(any_addr(), echo()),
            Err(GridError::Shutdown)
        ));
        let (sink, _rx) = collecting_sink();
        assert!(matches!(manager.create_connection(sink), Err(GridError::Shutdown)));

        // The stopped listener no longer accepts.
        assert!(tokio::net::TcpStream::connect(listener.local_addr()).await.is_err()
            || manager.connection_count() == 0);
    }

    #[tokio::test]
    async fn test_listener_stop_and_close_accepted() {
        let manager = TransportManager::new(TransportConfig::default());
        let listener = manager.create_listener(any_addr(), echo()).unwrap();

        let (sink, _keep) = collecting_sink();
        let conn = manager.open_connection(listener.local_addr(), sink).await.unwrap();
        conn.send_chain(1, 1, chain_of(manager.pool(), b"hi")).unwrap().wait().await.unwrap();
        assert_eq!(listener.accepted_count(), 1);

        listener.stop_and_close_accepted(Duration::from_secs(1)).await;
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_worker_pool_echo() {
        let config = TransportConfig::builder().worker_count(2).build().unwrap();
        let manager = TransportManager::new(config);
        let listener = manager.create_listener(any_addr(), echo()).unwrap();

        let (sink, mut rx) = collecting_sink();
        let conn = manager.open_connection(listener.local_addr(), sink).await.unwrap();
        for i in 0..20u64 {
            conn.send_chain(1, i, chain_of(manager.pool(), &[i as u8; 100])).unwrap();
        }
        for i in 0..20u64 {
            let (_, session_id, payload) = recv(&mut rx).await;
            assert_eq!(session_id, i);
            assert_eq!(payload, vec![i as u8; 100]);
        }

        let state = manager.state();
        assert_eq!(state.workers.len(), 2);
        assert!(state.workers.iter().any(|w| w.executed > 0));
    }

    #[tokio::test]
    async fn test_state_snapshot_reports_connections() {
        let manager = TransportManager::new(TransportConfig::default());
        let listener = manager.create_listener(any_addr(), echo()).unwrap();

        let (sink, mut rx) = collecting_sink();
        let conn = manager.open_connection(listener.local_addr(), sink).await.unwrap();
        conn.send_chain(1, 1, chain_of(manager.pool(), &[1; 64])).unwrap();
        recv(&mut rx).await;

        let state = manager.state();
        // Client and accepted server side of the same socket.
        assert_eq!(state.connections.len(), 2);
        assert!(state.connections.iter().any(|c| c.bytes_out > 0));
        assert!(state.connections.iter().any(|c| c.bytes_in > 0));
    }
}
