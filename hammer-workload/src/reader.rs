//! Readers: fetch leaves back from the log.
//!
//! Leaves are stored in bundles of `leaf_bundle_size` entries. Bundle `b`
//! lives at `seq/XX/XX/XX/XX/XX`, the hex bytes of `b` as a 40-bit number,
//! top byte first. The last bundle of the tree may be partial; it then
//! carries a `.<n>` suffix with its leaf count. A bundle size of 1 means each
//! file is the raw leaf; larger bundles hold one base64 leaf per line.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use hammer_core::{Leaf, Shutdown};
use hammer_flow::Throttle;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::WorkerError;
use crate::fetcher::Fetcher;
use crate::pool::{send_or_shutdown, Worker};
use crate::tracker::LogStateTracker;

/// Largest bundle index addressable by the sequenced layout.
const MAX_BUNDLE_INDEX: u64 = (1 << 40) - 1;

/// Returns the path of bundle `bundle_index`.
///
/// `partial` is the leaf count of a bundle that is not yet full.
#[must_use]
pub fn seq_path(bundle_index: u64, partial: Option<u64>) -> String {
    let b = bundle_index & MAX_BUNDLE_INDEX;
    let mut path = format!(
        "seq/{:02x}/{:02x}/{:02x}/{:02x}/{:02x}",
        (b >> 32) & 0xff,
        (b >> 24) & 0xff,
        (b >> 16) & 0xff,
        (b >> 8) & 0xff,
        b & 0xff,
    );
    if let Some(count) = partial {
        path.push_str(&format!(".{count}"));
    }
    path
}

/// Splits a fetched bundle into its leaves.
fn parse_bundle(raw: Bytes, bundle_size: u64, bundle_index: u64) -> Result<Vec<Bytes>, WorkerError> {
    if bundle_size == 1 {
        return Ok(vec![raw]);
    }
    raw.split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| {
            STANDARD
                .decode(line)
                .map(Bytes::from)
                .map_err(|e| WorkerError::MalformedBundle {
                    bundle_index,
                    reason: format!("invalid base64 leaf: {e}"),
                })
        })
        .collect()
}

/// How a reader picks the next leaf.
#[derive(Debug)]
pub enum ReadOrder {
    /// Uniformly random leaves from the whole tree.
    Random(ChaCha8Rng),
    /// Every leaf in order, starting at 0.
    Sequential {
        /// The next leaf to read.
        next: u64,
    },
}

impl ReadOrder {
    /// Random order seeded from entropy.
    #[must_use]
    pub fn random() -> Self {
        Self::Random(ChaCha8Rng::from_entropy())
    }

    /// Sequential order from the first leaf.
    #[must_use]
    pub const fn sequential() -> Self {
        Self::Sequential { next: 0 }
    }

    /// Picks the next index below `size`, or `None` if there is nothing to
    /// read yet. A sequential reader waits at the end of the tree.
    fn next_index(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        match self {
            Self::Random(rng) => Some(rng.gen_range(0..size)),
            Self::Sequential { next } => {
                if *next >= size {
                    return None;
                }
                let index = *next;
                *next += 1;
                Some(index)
            }
        }
    }
}

/// Bundle held by a reader between reads.
#[derive(Debug)]
struct CachedBundle {
    index: u64,
    leaves: Vec<Bytes>,
}

/// Reads one leaf per read-throttle token.
pub struct LeafReader {
    order: ReadOrder,
    tracker: Arc<dyn LogStateTracker>,
    fetcher: Arc<dyn Fetcher>,
    bundle_size: u64,
    throttle: Arc<Throttle>,
    errors: mpsc::Sender<WorkerError>,
    leaves: mpsc::Sender<Leaf>,
    cached: Option<CachedBundle>,
}

impl LeafReader {
    /// Creates a reader.
    ///
    /// `bundle_size` must be at least 1.
    #[must_use]
    pub fn new(
        order: ReadOrder,
        tracker: Arc<dyn LogStateTracker>,
        fetcher: Arc<dyn Fetcher>,
        bundle_size: u64,
        throttle: Arc<Throttle>,
        errors: mpsc::Sender<WorkerError>,
        leaves: mpsc::Sender<Leaf>,
    ) -> Self {
        Self {
            order,
            tracker,
            fetcher,
            bundle_size: bundle_size.max(1),
            throttle,
            errors,
            leaves,
            cached: None,
        }
    }

    /// Fetches leaf `index` of a tree of `size` leaves.
    async fn get_leaf(&mut self, index: u64, size: u64) -> Result<Bytes, WorkerError> {
        let bundle_index = index / self.bundle_size;
        let offset = usize::try_from(index % self.bundle_size).unwrap_or(usize::MAX);

        if let Some(cached) = self.cached.as_ref().filter(|c| c.index == bundle_index) {
            if let Some(leaf) = cached.leaves.get(offset) {
                return Ok(leaf.clone());
            }
        }

        let bundle_start = bundle_index * self.bundle_size;
        let partial = (size - bundle_start < self.bundle_size).then_some(size - bundle_start);
        let path = seq_path(bundle_index, partial);
        trace!(index, path = %path, "Fetching leaf bundle");

        let raw = self
            .fetcher
            .fetch(&path)
            .await
            .map_err(|source| WorkerError::Read { index, source })?;
        let leaves = parse_bundle(raw, self.bundle_size, bundle_index)?;
        let leaf = leaves.get(offset).cloned().ok_or_else(|| WorkerError::MalformedBundle {
            bundle_index,
            reason: format!("bundle has {} leaves, wanted offset {offset}", leaves.len()),
        })?;

        self.cached = Some(CachedBundle {
            index: bundle_index,
            leaves,
        });
        Ok(leaf)
    }
}

impl std::fmt::Debug for LeafReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafReader")
            .field("order", &self.order)
            .field("bundle_size", &self.bundle_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Worker for LeafReader {
    async fn run(self: Box<Self>, mut shutdown: Shutdown) {
        let mut reader = *self;
        loop {
            tokio::select! {
                () = shutdown.wait() => return,
                token = reader.throttle.acquire() => {
                    if token.is_err() {
                        return;
                    }
                }
            }

            let size = reader.tracker.latest_consistent().size;
            let Some(index) = reader.order.next_index(size) else {
                continue;
            };

            let delivered = match reader.get_leaf(index, size).await {
                Ok(data) => send_or_shutdown(&reader.leaves, Leaf::new(index, data), &mut shutdown).await,
                Err(e) => send_or_shutdown(&reader.errors, e, &mut shutdown).await,
            };
            if !delivered {
                return;
            }
        }
    }
}
