//! A single transport connection.

use std::collections::HashMap;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use gridlink_core::buffer::{BlockChain, BlockPool};
use gridlink_core::error::{GridError, Result};
use gridlink_core::protocol::{frame_message, Message, MessageAssembler, MessageSink};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::comm::WorkerHandle;
use crate::events::ConnectionEvent;
use crate::transform::BufferTransform;

/// Scatter-gather writes batch at most this many slices per syscall.
const MAX_WRITE_SLICES: usize = 64;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Created, no socket yet.
    Init,
    /// Outbound connect in progress.
    Connecting,
    /// Connected; I/O tasks running.
    Open,
    /// Close requested; draining or dropping pending writes.
    Closing,
    /// Terminal state; all pending blocks released.
    Closed,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Observable summary of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    /// The connection identifier.
    pub id: ConnectionId,
    /// Remote address, once connected.
    pub remote: Option<SocketAddr>,
    /// Current lifecycle state.
    pub state: ConnState,
    /// Total bytes received.
    pub bytes_in: u64,
    /// Total bytes sent.
    pub bytes_out: u64,
    /// Writes queued but not yet on the wire.
    pub queue_depth: usize,
}

/// Completion handle for one queued write.
///
/// Resolves `Ok` once the write has fully reached the socket, or with an
/// error if the connection closed first. Dropping the handle is fine; the
/// write still goes out.
#[derive(Debug)]
pub struct WriteCompletion {
    rx: oneshot::Receiver<Result<()>>,
}

impl WriteCompletion {
    /// Waits for the write to complete.
    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(GridError::Closed("connection closed".to_string())))
    }
}

struct WriteRequest {
    chain: BlockChain,
    done: oneshot::Sender<Result<()>>,
}

pub(crate) type ConnectionRegistry = Mutex<HashMap<ConnectionId, Connection>>;

pub(crate) struct ConnShared {
    id: ConnectionId,
    pool: BlockPool,
    worker: WorkerHandle,
    events: broadcast::Sender<ConnectionEvent>,
    registry: Weak<ConnectionRegistry>,
    max_payload: usize,
    connect_timeout: Option<Duration>,
    close_timeout: Duration,
    state: Mutex<ConnState>,
    remote: Mutex<Option<SocketAddr>>,
    write_tx: Mutex<Option<mpsc::UnboundedSender<WriteRequest>>>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<WriteRequest>>>,
    sink: Mutex<Option<Box<dyn MessageSink>>>,
    transform: Mutex<Option<Box<dyn BufferTransform>>>,
    cancel: watch::Sender<bool>,
    writer_done: watch::Sender<bool>,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    queue_depth: AtomicUsize,
}

impl ConnShared {
    fn emit(&self, event: ConnectionEvent) {
        let events = self.events.clone();
        self.worker.execute(Box::new(move || {
            let _ = events.send(event);
        }));
    }

    fn complete(&self, done: oneshot::Sender<Result<()>>, result: Result<()>) {
        self.worker.execute(Box::new(move || {
            let _ = done.send(result);
        }));
    }

    /// Terminal transition; idempotent.
    fn finish_close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ConnState::Closed {
                return;
            }
            *state = ConnState::Closed;
        }
        let address = *self.remote.lock().unwrap();
        debug!(id = %self.id, ?address, "connection closed");
        self.emit(ConnectionEvent::Closed { id: self.id, address });
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().unwrap().remove(&self.id);
        }
        self.worker.detach();
    }
}

/// Schedules an asynchronous close from inside an I/O task.
fn spawn_close(shared: &Arc<ConnShared>) {
    Connection {
        shared: Arc::clone(shared),
    }
    .close_async();
}

/// A connection to a single peer.
///
/// The handle is cheap to clone; all clones drive the same underlying
/// socket. Writes are strictly FIFO on the wire, receive dispatch is
/// strictly in arrival order, and events for this connection are serialized
/// on its owning worker.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnShared>,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pool: BlockPool,
        worker: WorkerHandle,
        events: broadcast::Sender<ConnectionEvent>,
        registry: Weak<ConnectionRegistry>,
        max_payload: usize,
        connect_timeout: Option<Duration>,
        close_timeout: Duration,
        transform: Box<dyn BufferTransform>,
    ) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (cancel, _) = watch::channel(false);
        let (writer_done, _) = watch::channel(false);
        Self {
            shared: Arc::new(ConnShared {
                id: ConnectionId::new(),
                pool,
                worker,
                events,
                registry,
                max_payload,
                connect_timeout,
                close_timeout,
                state: Mutex::new(ConnState::Init),
                remote: Mutex::new(None),
                write_tx: Mutex::new(Some(write_tx)),
                write_rx: Mutex::new(Some(write_rx)),
                sink: Mutex::new(None),
                transform: Mutex::new(Some(transform)),
                cancel,
                writer_done,
                bytes_in: AtomicU64::new(0),
                bytes_out: AtomicU64::new(0),
                queue_depth: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn install_sink(&self, sink: Box<dyn MessageSink>) {
        *self.shared.sink.lock().unwrap() = Some(sink);
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnState {
        *self.shared.state.lock().unwrap()
    }

    /// Returns the remote address, once connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.shared.remote.lock().unwrap()
    }

    /// Returns total bytes received on this connection.
    pub fn bytes_in(&self) -> u64 {
        self.shared.bytes_in.load(Ordering::Acquire)
    }

    /// Returns total bytes sent on this connection.
    pub fn bytes_out(&self) -> u64 {
        self.shared.bytes_out.load(Ordering::Acquire)
    }

    /// Returns the number of writes queued but not yet on the wire.
    pub fn queue_depth(&self) -> usize {
        self.shared.queue_depth.load(Ordering::Acquire)
    }

    /// Returns an observable summary for the manager's state snapshot.
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id(),
            remote: self.remote_addr(),
            state: self.state(),
            bytes_in: self.bytes_in(),
            bytes_out: self.bytes_out(),
            queue_depth: self.queue_depth(),
        }
    }

    /// Initiates an outbound connect.
    ///
    /// Bounded by the configured connect timeout. On success the connection
    /// is open, its I/O tasks are running, and a `Connected` event has been
    /// emitted.
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                ConnState::Init => *state = ConnState::Connecting,
                other => {
                    return Err(GridError::Lifecycle(format!(
                        "cannot connect a {} connection",
                        other
                    )))
                }
            }
        }

        let attempt = TcpStream::connect(addr);
        let connected = match self.shared.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    self.shared.finish_close();
                    return Err(GridError::Timeout(format!(
                        "connection to {} timed out after {:?}",
                        addr, limit
                    )));
                }
            },
            None => attempt.await,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.finish_close();
                return Err(e.into());
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(id = %self.shared.id, error = %e, "failed to set TCP_NODELAY");
        }
        let peer = stream.peer_addr().unwrap_or(addr);
        *self.shared.remote.lock().unwrap() = Some(peer);

        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != ConnState::Connecting {
                return Err(GridError::Closed("closed during connect".to_string()));
            }
            *state = ConnState::Open;
        }

        debug!(id = %self.shared.id, address = %peer, "established connection");
        self.shared.emit(ConnectionEvent::Connected {
            id: self.shared.id,
            address: peer,
        });
        self.start_io(stream);
        Ok(())
    }

    /// Opens an inbound connection over an accepted socket.
    pub(crate) fn open_accepted(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(id = %self.shared.id, error = %e, "failed to set TCP_NODELAY");
        }
        *self.shared.remote.lock().unwrap() = Some(peer);
        *self.shared.state.lock().unwrap() = ConnState::Open;
        self.shared.emit(ConnectionEvent::Connected {
            id: self.shared.id,
            address: peer,
        });
        self.start_io(stream);
    }

    /// Queues a logical message for transmission.
    ///
    /// Messages may be queued before the connection opens; the writer drains
    /// the queue once it does. Returns a completion handle that resolves
    /// when the bytes have reached the socket.
    pub fn send(&self, message: Message) -> Result<WriteCompletion> {
        let message_type = message.message_type();
        let session_id = message.session_id();
        let body = message.encode(&self.shared.pool);
        self.send_chain(message_type, session_id, body)
    }

    /// Queues a raw payload chain for transmission as one logical message.
    pub fn send_chain(
        &self,
        message_type: u8,
        session_id: u64,
        payload: BlockChain,
    ) -> Result<WriteCompletion> {
        {
            let state = self.shared.state.lock().unwrap();
            if matches!(*state, ConnState::Closing | ConnState::Closed) {
                return Err(GridError::Closed("connection is closed".to_string()));
            }
        }

        let wire = frame_message(
            &self.shared.pool,
            message_type,
            session_id,
            payload,
            self.shared.max_payload,
        );

        let (done_tx, done_rx) = oneshot::channel();
        let accepted = {
            let guard = self.shared.write_tx.lock().unwrap();
            match guard.as_ref() {
                Some(tx) => tx
                    .send(WriteRequest {
                        chain: wire,
                        done: done_tx,
                    })
                    .is_ok(),
                None => false,
            }
        };
        if !accepted {
            return Err(GridError::Closed("connection is closed".to_string()));
        }
        self.shared.queue_depth.fetch_add(1, Ordering::AcqRel);
        Ok(WriteCompletion { rx: done_rx })
    }

    /// Gracefully closes the connection.
    ///
    /// Stops accepting new writes, drains the queue for at most `timeout`,
    /// then closes the socket. A second close is a no-op.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let prior = {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                ConnState::Closed | ConnState::Closing => return Ok(()),
                prior => {
                    *state = ConnState::Closing;
                    prior
                }
            }
        };

        if matches!(prior, ConnState::Init | ConnState::Connecting) {
            // No I/O tasks yet; fail anything queued ahead of the open.
            *self.shared.write_tx.lock().unwrap() = None;
            if let Some(mut rx) = self.shared.write_rx.lock().unwrap().take() {
                fail_remaining(&self.shared, &mut rx);
            }
            self.shared.finish_close();
            return Ok(());
        }

        // Stop accepting writes; the writer drains what is already queued.
        *self.shared.write_tx.lock().unwrap() = None;
        if !timeout.is_zero() {
            let mut done = self.shared.writer_done.subscribe();
            let _ = tokio::time::timeout(timeout, done.wait_for(|d| *d)).await;
        }
        let _ = self.shared.cancel.send(true);
        self.shared.finish_close();
        Ok(())
    }

    /// Gracefully closes with the configured default close timeout.
    pub async fn close_graceful(&self) -> Result<()> {
        self.close(self.shared.close_timeout).await
    }

    /// Schedules a close with a zero drain timeout and returns immediately.
    pub fn close_async(&self) {
        let conn = self.clone();
        tokio::spawn(async move {
            let _ = conn.close(Duration::ZERO).await;
        });
    }

    fn start_io(&self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let rx = self
            .shared
            .write_rx
            .lock()
            .unwrap()
            .take()
            .expect("connection I/O already started");
        let sink = Arc::new(Mutex::new(
            self.shared.sink.lock().unwrap().take().expect("no sink installed"),
        ));
        let transform = Arc::new(Mutex::new(
            self.shared
                .transform
                .lock()
                .unwrap()
                .take()
                .expect("no transform installed"),
        ));

        let writer_shared = Arc::clone(&self.shared);
        let writer_transform = Arc::clone(&transform);
        tokio::spawn(async move {
            writer_loop(writer_shared, write_half, rx, writer_transform).await;
        });

        let reader_shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            reader_loop(reader_shared, read_half, sink, transform).await;
        });
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("remote", &self.remote_addr())
            .finish()
    }
}

async fn writer_loop(
    shared: Arc<ConnShared>,
    mut half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    transform: Arc<Mutex<Box<dyn BufferTransform>>>,
) {
    let mut cancel = shared.cancel.subscribe();
    loop {
        let request = tokio::select! {
            req = rx.recv() => req,
            _ = cancel.wait_for(|c| *c) => {
                fail_remaining(&shared, &mut rx);
                break;
            }
        };
        let Some(request) = request else {
            // Graceful close: senders dropped and the queue is drained.
            break;
        };
        shared.queue_depth.fetch_sub(1, Ordering::AcqRel);

        let mut chain = match transform.lock().unwrap().wrap_write(request.chain) {
            Ok(chain) => chain,
            Err(e) => {
                shared.complete(request.done, Err(e.clone()));
                shared.emit(ConnectionEvent::Error {
                    id: shared.id,
                    error: e,
                });
                fail_remaining(&shared, &mut rx);
                spawn_close(&shared);
                break;
            }
        };

        let written = tokio::select! {
            r = write_chain(&mut half, &mut chain) => r,
            _ = cancel.wait_for(|c| *c) => {
                shared.complete(request.done, Err(GridError::Closed("connection closed".to_string())));
                fail_remaining(&shared, &mut rx);
                break;
            }
        };
        match written {
            Ok(n) => {
                shared.bytes_out.fetch_add(n, Ordering::AcqRel);
                shared.complete(request.done, Ok(()));
            }
            Err(e) => {
                let error = GridError::from(e);
                shared.complete(request.done, Err(error.clone()));
                shared.emit(ConnectionEvent::Error {
                    id: shared.id,
                    error,
                });
                fail_remaining(&shared, &mut rx);
                spawn_close(&shared);
                break;
            }
        }
    }
    let _ = shared.writer_done.send(true);
    trace!(id = %shared.id, "writer loop ended");
}

/// Scatter-gather write of a whole chain; partial writes advance the chain.
async fn write_chain(half: &mut OwnedWriteHalf, chain: &mut BlockChain) -> io::Result<u64> {
    let mut total = 0u64;
    while !chain.is_empty() {
        let n = {
            let slices: Vec<IoSlice<'_>> = chain
                .slices()
                .take(MAX_WRITE_SLICES)
                .map(IoSlice::new)
                .collect();
            half.write_vectored(&slices).await?
        };
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "socket write returned zero",
            ));
        }
        chain.consume(n);
        total += n as u64;
    }
    Ok(total)
}

fn fail_remaining(shared: &Arc<ConnShared>, rx: &mut mpsc::UnboundedReceiver<WriteRequest>) {
    rx.close();
    while let Ok(request) = rx.try_recv() {
        shared.queue_depth.fetch_sub(1, Ordering::AcqRel);
        shared.complete(
            request.done,
            Err(GridError::Closed("connection closed".to_string())),
        );
    }
}

async fn reader_loop(
    shared: Arc<ConnShared>,
    mut half: OwnedReadHalf,
    sink: Arc<Mutex<Box<dyn MessageSink>>>,
    transform: Arc<Mutex<Box<dyn BufferTransform>>>,
) {
    use tokio::io::AsyncReadExt;

    let mut cancel = shared.cancel.subscribe();
    let mut assembler = MessageAssembler::new(shared.pool.clone(), shared.max_payload);
    loop {
        // Back-pressure: a pool at its outstanding limit parks the reader
        // until the sink releases blocks.
        let mut block = tokio::select! {
            block = shared.pool.acquire_when_available() => block,
            _ = cancel.wait_for(|c| *c) => break,
        };

        let read = {
            let mut view = block.unfilled();
            tokio::select! {
                r = half.read_buf(&mut view) => r,
                _ = cancel.wait_for(|c| *c) => break,
            }
        };

        match read {
            Ok(0) => {
                debug!(id = %shared.id, "end of stream");
                shared.emit(ConnectionEvent::Eof { id: shared.id });
                spawn_close(&shared);
                break;
            }
            Ok(n) => {
                shared.bytes_in.fetch_add(n as u64, Ordering::AcqRel);
                let block = match transform.lock().unwrap().unwrap_read(block) {
                    Ok(block) => block,
                    Err(error) => {
                        shared.emit(ConnectionEvent::Error {
                            id: shared.id,
                            error,
                        });
                        spawn_close(&shared);
                        break;
                    }
                };
                match assembler.add_read_data(block) {
                    Ok(messages) => {
                        for message in messages {
                            let sink = Arc::clone(&sink);
                            shared.worker.execute(Box::new(move || {
                                sink.lock().unwrap().on_message(
                                    message.message_type,
                                    message.session_id,
                                    message.payload,
                                );
                            }));
                        }
                    }
                    Err(error) => {
                        warn!(id = %shared.id, error = %error, "protocol fault");
                        shared.emit(ConnectionEvent::Error {
                            id: shared.id,
                            error,
                        });
                        spawn_close(&shared);
                        break;
                    }
                }
            }
            Err(e) => {
                let error = GridError::from(e);
                debug!(id = %shared.id, error = %error, "read failed");
                shared.emit(ConnectionEvent::Error {
                    id: shared.id,
                    error,
                });
                spawn_close(&shared);
                break;
            }
        }
    }
    trace!(id = %shared.id, "reader loop ended");
}
