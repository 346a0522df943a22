//! Elastic pools of load-generating workers.
//!
//! A pool owns the abort handles of the tasks it spawned. Growing spawns one
//! more worker from the pool's factory; shrinking aborts the most recently
//! spawned one. Workers never stop on their own because of I/O errors, so
//! the pool size is exactly the number of workers generating load.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use hammer_core::Shutdown;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

/// One unit of load generation: a reader or a writer.
#[async_trait]
pub trait Worker: Send {
    /// Runs the worker loop until shutdown or until the task is aborted.
    async fn run(self: Box<Self>, shutdown: Shutdown);
}

/// Builds a fresh worker for each slot in a pool.
pub type WorkerFactory = Box<dyn Fn() -> Box<dyn Worker> + Send + Sync>;

/// A resizable set of running workers of one kind.
pub struct WorkerPool {
    name: &'static str,
    factory: WorkerFactory,
    handles: Mutex<Vec<AbortHandle>>,
}

impl WorkerPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(name: &'static str, factory: WorkerFactory) -> Self {
        Self {
            name,
            factory,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the pool name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the number of running workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Starts one more worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn grow(&self, shutdown: &Shutdown) {
        let worker = (self.factory)();
        let task = tokio::spawn(worker.run(shutdown.clone()));

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.push(task.abort_handle());
        debug!(pool = self.name, size = handles.len(), "Grew worker pool");
    }

    /// Stops the most recently started worker.
    ///
    /// Returns false, doing nothing, if the pool is empty.
    pub fn shrink(&self) -> bool {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = handles.pop() else {
            return false;
        };
        handle.abort();
        debug!(pool = self.name, size = handles.len(), "Shrank worker pool");
        true
    }

    /// Stops every worker.
    pub fn clear(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// Sends `value`, waiting for queue space unless shutdown comes first.
///
/// Returns false if the value was not delivered.
pub(crate) async fn send_or_shutdown<T: Send>(
    queue: &mpsc::Sender<T>,
    value: T,
    shutdown: &mut Shutdown,
) -> bool {
    tokio::select! {
        () = shutdown.wait() => false,
        sent = queue.send(value) => sent.is_ok(),
    }
}
