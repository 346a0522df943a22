//! Global analysis of observed leaves.
//!
//! Every reader and writer pushes the leaves it sees into one bounded intake
//! queue. A single task drains the queue and looks for the same content at
//! two different indices, which an append-only log that deduplicates must
//! never produce.
//!
//! The lookup is a fixed-size LRU cache, so duplicates further apart than
//! its working set go unnoticed. That is a known blind spot; raise the cache
//! capacity for long runs if it matters.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use hammer_core::{Leaf, Shutdown};
use lru::LruCache;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of analysing one leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First sighting of this content within the cache window.
    New,
    /// Same content at the same index, seen before.
    Repeat,
    /// Same content at a different index.
    Duplicate {
        /// Index previously recorded for the content.
        previous_index: u64,
    },
}

/// Receives every observed leaf and counts cross-index duplicates.
#[derive(Debug)]
pub struct LeafConsumer {
    intake: mpsc::Sender<Leaf>,
    queue: Mutex<Option<mpsc::Receiver<Leaf>>>,
    lookup: Mutex<LruCache<Bytes, u64>>,
    duplicate_count: AtomicU64,
}

impl LeafConsumer {
    /// Creates a consumer.
    ///
    /// `cache_capacity` and `queue_capacity` are clamped to at least one.
    #[must_use]
    pub fn new(cache_capacity: usize, queue_capacity: usize) -> Self {
        let (intake, queue) = mpsc::channel(queue_capacity.max(1));
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            intake,
            queue: Mutex::new(Some(queue)),
            lookup: Mutex::new(LruCache::new(capacity)),
            duplicate_count: AtomicU64::new(0),
        }
    }

    /// Returns a handle for submitting leaves.
    ///
    /// Sends wait while the queue is full.
    #[must_use]
    pub fn intake(&self) -> mpsc::Sender<Leaf> {
        self.intake.clone()
    }

    /// Returns the number of cross-index duplicates seen so far.
    #[must_use]
    pub fn duplicate_count(&self) -> u64 {
        self.duplicate_count.load(Ordering::Relaxed)
    }

    /// Analyses a single leaf.
    pub fn observe(&self, leaf: &Leaf) -> Observation {
        let mut lookup = self.lookup.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = lookup.get(&leaf.data).copied();
        match previous {
            Some(previous_index) if previous_index != leaf.index => {
                self.duplicate_count.fetch_add(1, Ordering::Relaxed);
                debug!(
                    data = %String::from_utf8_lossy(&leaf.data),
                    previous_index,
                    index = leaf.index,
                    "Found two indices for leaf data"
                );
                Observation::Duplicate { previous_index }
            }
            Some(_) => Observation::Repeat,
            None => {
                lookup.put(leaf.data.clone(), leaf.index);
                Observation::New
            }
        }
    }

    /// Drains the intake queue until shutdown.
    ///
    /// Only one drain loop may run; a second call returns immediately.
    pub async fn run(&self, mut shutdown: Shutdown) {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut queue) = queue else {
            warn!("Leaf consumer is already running");
            return;
        };

        loop {
            tokio::select! {
                () = shutdown.wait() => return,
                leaf = queue.recv() => match leaf {
                    Some(leaf) => {
                        self.observe(&leaf);
                    }
                    // Unreachable while `self.intake` is alive.
                    None => return,
                },
            }
        }
    }
}

impl fmt::Display for LeafConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duplicates: {}", self.duplicate_count())
    }
}
