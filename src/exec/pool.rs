//! Fixed-size pool of long-lived executor tasks fed by a bounded queue.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Queue slots per worker.
pub const QUEUE_SLOTS_PER_WORKER: usize = 10;

pub type Task = BoxFuture<'static, ()>;

/// What `submit` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait for a free slot.
    #[default]
    Block,
    /// Fail immediately with [`Error::PoolUnavailable`].
    Reject,
}

/// A bounded pool of `size` workers.
///
/// Exactly `size` workers live from construction until [`WorkerPool::shutdown`];
/// a panicking task is caught and does not take its worker down. Accepted
/// tasks are never dropped: the queue either makes the submitter wait or
/// refuses the task up front, depending on [`Backpressure`].
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    policy: Backpressure,
}

impl WorkerPool {
    /// Spawns the workers. Must be called from within a tokio runtime.
    pub fn new(size: usize, policy: Backpressure) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Task>(size * QUEUE_SLOTS_PER_WORKER);
        let rx = Arc::new(AsyncMutex::new(rx));

        let workers = (0..size)
            .map(|id| tokio::spawn(worker(id, Arc::clone(&rx))))
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
            policy,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.size * QUEUE_SLOTS_PER_WORKER
    }

    pub fn policy(&self) -> Backpressure {
        self.policy
    }

    /// Enqueues a task.
    ///
    /// Fails with [`Error::PoolUnavailable`] once shutdown has begun, or when
    /// the queue is full under [`Backpressure::Reject`].
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().clone().ok_or(Error::PoolUnavailable)?;
        let task: Task = Box::pin(task);

        match self.policy {
            Backpressure::Block => sender
                .send(task)
                .await
                .map_err(|_| Error::PoolUnavailable),
            Backpressure::Reject => sender.try_send(task).map_err(|_| Error::PoolUnavailable),
        }
    }

    /// Stops accepting work, lets the workers drain the queue, and waits for them.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
        debug!(size = self.size, "Worker pool drained");
    }
}

async fn worker(id: usize, queue: Arc<AsyncMutex<mpsc::Receiver<Task>>>) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };

        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
            warn!(worker = id, "Task panicked");
        }
    }
    debug!(worker = id, "Worker exiting");
}
