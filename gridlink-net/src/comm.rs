//! The worker pool driving per-connection event execution.
//!
//! Each worker owns a FIFO job queue drained by a single task. A connection
//! is assigned to the least-loaded worker when it is registered and never
//! migrates; message dispatch, event delivery, and write completions for
//! that connection all run through its worker, which serializes them and
//! preserves arrival order. With zero workers, jobs execute inline on the
//! submitting task.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

pub(crate) type Job = Box<dyn FnOnce() + Send>;

enum WorkerMsg {
    Run(Job),
    Stop,
}

struct WorkerInner {
    id: usize,
    tx: mpsc::UnboundedSender<WorkerMsg>,
    assigned: AtomicUsize,
    executed: AtomicUsize,
    stopped: AtomicBool,
}

/// Handle to the worker owning a connection.
///
/// Cloning shares the same queue. An inline handle (from a zero-worker
/// pool) executes jobs directly on the caller.
#[derive(Clone)]
pub(crate) struct WorkerHandle {
    inner: Option<Arc<WorkerInner>>,
}

impl WorkerHandle {
    pub(crate) fn inline() -> Self {
        Self { inner: None }
    }

    /// Runs a job on this worker's queue, or inline for inline handles.
    ///
    /// Jobs submitted after the worker stopped run inline so completions
    /// still fire during shutdown.
    pub(crate) fn execute(&self, job: Job) {
        match &self.inner {
            None => job(),
            Some(worker) => {
                if worker.stopped.load(Ordering::Acquire) {
                    job();
                    return;
                }
                if let Err(mpsc::error::SendError(msg)) = worker.tx.send(WorkerMsg::Run(job)) {
                    if let WorkerMsg::Run(job) = msg {
                        job();
                    }
                }
            }
        }
    }

    /// Records that a connection was released from this worker.
    pub(crate) fn detach(&self) {
        if let Some(worker) = &self.inner {
            worker.assigned.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            None => write!(f, "WorkerHandle(inline)"),
            Some(w) => write!(f, "WorkerHandle({})", w.id),
        }
    }
}

/// Observable state of one worker.
#[derive(Debug, Clone)]
pub struct WorkerState {
    /// Worker index.
    pub id: usize,
    /// Connections currently assigned to this worker.
    pub assigned: usize,
    /// Jobs executed since start.
    pub executed: usize,
}

/// A fixed pool of I/O workers.
pub(crate) struct Comm {
    workers: Vec<Arc<WorkerInner>>,
}

impl Comm {
    /// Starts `worker_count` workers; zero means inline execution.
    pub(crate) fn new(worker_count: usize) -> Self {
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let inner = Arc::new(WorkerInner {
                id,
                tx,
                assigned: AtomicUsize::new(0),
                executed: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
            });
            let task_inner = Arc::clone(&inner);
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    match msg {
                        WorkerMsg::Run(job) => {
                            job();
                            task_inner.executed.fetch_add(1, Ordering::AcqRel);
                        }
                        WorkerMsg::Stop => break,
                    }
                }
                debug!(worker = task_inner.id, "worker stopped");
            });
            workers.push(inner);
        }
        Self { workers }
    }

    /// Picks the least-loaded worker for a new connection.
    pub(crate) fn worker_for_new_connection(&self) -> WorkerHandle {
        let Some(worker) = self
            .workers
            .iter()
            .min_by_key(|w| w.assigned.load(Ordering::Acquire))
        else {
            return WorkerHandle::inline();
        };
        worker.assigned.fetch_add(1, Ordering::AcqRel);
        WorkerHandle {
            inner: Some(Arc::clone(worker)),
        }
    }

    /// Stops all workers after their queued jobs drain.
    pub(crate) fn stop(&self) {
        for worker in &self.workers {
            worker.stopped.store(true, Ordering::Release);
            let _ = worker.tx.send(WorkerMsg::Stop);
        }
    }

    /// Returns an observable snapshot of every worker.
    pub(crate) fn state(&self) -> Vec<WorkerState> {
        self.workers
            .iter()
            .map(|w| WorkerState {
                id: w.id,
                assigned: w.assigned.load(Ordering::Acquire),
                executed: w.executed.load(Ordering::Acquire),
            })
            .collect()
    }
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm").field("workers", &self.workers.len()).finish()
    }
}
