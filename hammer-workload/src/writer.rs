//! Writers: add generated leaves to the log.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use hammer_core::{Leaf, Shutdown};
use hammer_flow::Throttle;
use tokio::sync::mpsc;

use crate::error::{WorkerError, WriteError};
use crate::generator::LeafGenerator;
use crate::pool::{send_or_shutdown, Worker};

/// The log's write endpoint.
#[async_trait]
pub trait LeafAdder: Send + Sync {
    /// Submits one leaf and returns the index the log assigned to it.
    ///
    /// A leaf the log has seen before may come back with its original index.
    async fn add(&self, data: Bytes) -> Result<u64, WriteError>;
}

/// Writes one generated leaf per write-throttle token.
///
/// All writers of a hammer draw from one shared generator, so the log sees a
/// single stream of payloads with duplicates injected into it.
pub struct LeafWriter {
    generator: Arc<Mutex<LeafGenerator>>,
    adder: Arc<dyn LeafAdder>,
    throttle: Arc<Throttle>,
    errors: mpsc::Sender<WorkerError>,
    leaves: mpsc::Sender<Leaf>,
}

impl LeafWriter {
    /// Creates a writer.
    #[must_use]
    pub fn new(
        generator: Arc<Mutex<LeafGenerator>>,
        adder: Arc<dyn LeafAdder>,
        throttle: Arc<Throttle>,
        errors: mpsc::Sender<WorkerError>,
        leaves: mpsc::Sender<Leaf>,
    ) -> Self {
        Self {
            generator,
            adder,
            throttle,
            errors,
            leaves,
        }
    }

    fn next_leaf(&self) -> Bytes {
        self.generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_leaf()
    }
}

impl std::fmt::Debug for LeafWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafWriter").finish_non_exhaustive()
    }
}

#[async_trait]
impl Worker for LeafWriter {
    async fn run(self: Box<Self>, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                () = shutdown.wait() => return,
                token = self.throttle.acquire() => {
                    if token.is_err() {
                        return;
                    }
                }
            }

            let data = self.next_leaf();
            let delivered = match self.adder.add(data.clone()).await {
                Ok(index) => send_or_shutdown(&self.leaves, Leaf::new(index, data), &mut shutdown).await,
                Err(e) => send_or_shutdown(&self.errors, WorkerError::Write(e), &mut shutdown).await,
            };
            if !delivered {
                return;
            }
        }
    }
}
