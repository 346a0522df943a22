//! The hammer: wires throttles, worker pools and analysis together.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use hammer_core::Shutdown;
use hammer_flow::{Throttle, ThrottleStats};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HammerConfig;
use crate::consumer::LeafConsumer;
use crate::error::{HammerError, HammerResult, TrackerError, WorkerError};
use crate::fetcher::Fetcher;
use crate::generator::LeafGenerator;
use crate::pool::{Worker, WorkerPool};
use crate::reader::{LeafReader, ReadOrder};
use crate::tracker::LogStateTracker;
use crate::writer::{LeafAdder, LeafWriter};

/// Point-in-time summary of a running hammer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HammerStatus {
    /// Read throttle state.
    pub read: ThrottleStats,
    /// Write throttle state.
    pub write: ThrottleStats,
    /// Cross-index duplicates found so far.
    pub duplicates: u64,
    /// Running random-order readers.
    pub random_readers: usize,
    /// Running sequential readers.
    pub full_readers: usize,
    /// Running writers.
    pub writers: usize,
}

impl fmt::Display for HammerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Read: {}\nWrite: {}\nAnalysis: Duplicates: {}\nWorkers: {} random readers, {} full readers, {} writers",
            self.read, self.write, self.duplicates, self.random_readers, self.full_readers, self.writers
        )
    }
}

/// Load generator for one log.
///
/// Reads are spread over every mirror by the fetcher it is given; writes all
/// go to one endpoint. Rates and pool sizes can be changed while
/// [`Hammer::run`] is in progress.
pub struct Hammer {
    config: HammerConfig,
    tracker: Arc<dyn LogStateTracker>,
    read_throttle: Arc<Throttle>,
    write_throttle: Arc<Throttle>,
    consumer: Arc<LeafConsumer>,
    random_readers: WorkerPool,
    full_readers: WorkerPool,
    writers: WorkerPool,
    errors: Mutex<Option<mpsc::Receiver<WorkerError>>>,
}

impl Hammer {
    /// Creates a hammer. No task is started until [`Hammer::run`].
    ///
    /// Generated leaves are numbered from the tracker's current tree size, so
    /// the tracker should have been updated at least once.
    ///
    /// # Errors
    ///
    /// Returns `HammerError::Config` if the configuration is invalid.
    pub fn new(
        config: HammerConfig,
        tracker: Arc<dyn LogStateTracker>,
        fetcher: Arc<dyn Fetcher>,
        adder: Arc<dyn LeafAdder>,
    ) -> HammerResult<Self> {
        config.validate()?;

        let read_throttle = Arc::new(Throttle::new(config.max_read_ops));
        let write_throttle = Arc::new(Throttle::new(config.max_write_ops));
        let consumer = Arc::new(LeafConsumer::new(
            config.dedup_cache_capacity,
            config.leaf_queue_capacity,
        ));
        let (error_tx, error_rx) = mpsc::channel(config.error_queue_capacity);

        let generator = Arc::new(Mutex::new(LeafGenerator::new(
            tracker.latest_consistent().size,
            config.leaf_min_size,
            config.duplicate_chance,
        )));

        let reader_pool = |name: &'static str, order: fn() -> ReadOrder| {
            let tracker = Arc::clone(&tracker);
            let fetcher = Arc::clone(&fetcher);
            let throttle = Arc::clone(&read_throttle);
            let errors = error_tx.clone();
            let leaves = consumer.intake();
            let bundle_size = config.leaf_bundle_size;
            WorkerPool::new(
                name,
                Box::new(move || {
                    Box::new(LeafReader::new(
                        order(),
                        Arc::clone(&tracker),
                        Arc::clone(&fetcher),
                        bundle_size,
                        Arc::clone(&throttle),
                        errors.clone(),
                        leaves.clone(),
                    )) as Box<dyn Worker>
                }),
            )
        };
        let random_readers = reader_pool("random-readers", ReadOrder::random);
        let full_readers = reader_pool("full-readers", ReadOrder::sequential);

        let writers = {
            let throttle = Arc::clone(&write_throttle);
            let leaves = consumer.intake();
            WorkerPool::new(
                "writers",
                Box::new(move || {
                    Box::new(LeafWriter::new(
                        Arc::clone(&generator),
                        Arc::clone(&adder),
                        Arc::clone(&throttle),
                        error_tx.clone(),
                        leaves.clone(),
                    )) as Box<dyn Worker>
                }),
            )
        };

        Ok(Self {
            config,
            tracker,
            read_throttle,
            write_throttle,
            consumer,
            random_readers,
            full_readers,
            writers,
            errors: Mutex::new(Some(error_rx)),
        })
    }

    /// Runs the hammer until shutdown or until the log is caught out.
    ///
    /// Starts the configured number of workers, the error drain, both
    /// throttles and the duplicate analysis, then refreshes the tracker once
    /// per poll interval. Every task started here is stopped before return.
    ///
    /// # Errors
    ///
    /// Returns `HammerError::Inconsistent`, carrying both checkpoints, if the
    /// tracker finds the log inconsistent, and `HammerError::AlreadyRunning`
    /// if called a second time.
    pub async fn run(&self, shutdown: Shutdown) -> HammerResult<()> {
        let errors = self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(HammerError::AlreadyRunning)?;

        let mut tasks = JoinSet::new();
        {
            let consumer = Arc::clone(&self.consumer);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { consumer.run(shutdown).await });
        }

        for _ in 0..self.config.num_readers_random {
            self.random_readers.grow(&shutdown);
        }
        for _ in 0..self.config.num_readers_full {
            self.full_readers.grow(&shutdown);
        }
        for _ in 0..self.config.num_writers {
            self.writers.grow(&shutdown);
        }

        tasks.spawn(drain_errors(errors, shutdown.clone()));
        for throttle in [&self.read_throttle, &self.write_throttle] {
            let throttle = Arc::clone(throttle);
            let shutdown = shutdown.clone();
            tasks.spawn(async move { throttle.run(shutdown).await });
        }
        info!(
            random_readers = self.config.num_readers_random,
            full_readers = self.config.num_readers_full,
            writers = self.config.num_writers,
            "Hammer started"
        );

        let result = self.poll_checkpoints(shutdown).await;

        for pool in self.pools() {
            pool.clear();
        }
        tasks.abort_all();
        result
    }

    async fn poll_checkpoints(&self, mut shutdown: Shutdown) -> HammerResult<()> {
        let interval = self.config.checkpoint_poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.wait() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let old_size = self.tracker.latest_consistent().size;
            let updated = tokio::select! {
                () = shutdown.wait() => return Ok(()),
                updated = self.tracker.update() => updated,
            };

            match updated {
                Ok(checkpoint) => {
                    if checkpoint.size > old_size {
                        debug!(old_size, new_size = checkpoint.size, "Checkpoint grew");
                    }
                }
                Err(TrackerError::Inconsistent {
                    smaller_raw,
                    larger_raw,
                    reason,
                }) => {
                    error!(reason = %reason, "Log inconsistency detected");
                    return Err(HammerError::Inconsistent {
                        smaller_raw,
                        larger_raw,
                        reason,
                    });
                }
                Err(e) => warn!(error = %e, "Failed to update checkpoint"),
            }
        }
    }

    fn pools(&self) -> [&WorkerPool; 3] {
        [&self.random_readers, &self.full_readers, &self.writers]
    }

    /// Raises the read rate by 10%. Returns the new rate.
    pub fn increase_read_rate(&self) -> u64 {
        let rate = self.read_throttle.increase();
        info!(rate, "Increased read operations per second");
        rate
    }

    /// Lowers the read rate by 10%. Returns the new rate.
    pub fn decrease_read_rate(&self) -> u64 {
        let rate = self.read_throttle.decrease();
        info!(rate, "Decreased read operations per second");
        rate
    }

    /// Raises the write rate by 10%. Returns the new rate.
    pub fn increase_write_rate(&self) -> u64 {
        let rate = self.write_throttle.increase();
        info!(rate, "Increased write operations per second");
        rate
    }

    /// Lowers the write rate by 10%. Returns the new rate.
    pub fn decrease_write_rate(&self) -> u64 {
        let rate = self.write_throttle.decrease();
        info!(rate, "Decreased write operations per second");
        rate
    }

    /// Adds one worker to every pool.
    pub fn grow_workers(&self, shutdown: &Shutdown) {
        for pool in self.pools() {
            pool.grow(shutdown);
        }
        info!("Increased the number of workers");
    }

    /// Removes one worker from every pool that has one.
    pub fn shrink_workers(&self) {
        for pool in self.pools() {
            pool.shrink();
        }
        info!("Decreased the number of workers");
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> HammerStatus {
        HammerStatus {
            read: self.read_throttle.stats(),
            write: self.write_throttle.stats(),
            duplicates: self.consumer.duplicate_count(),
            random_readers: self.random_readers.size(),
            full_readers: self.full_readers.size(),
            writers: self.writers.size(),
        }
    }
}

impl fmt::Debug for Hammer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hammer")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn drain_errors(mut errors: mpsc::Receiver<WorkerError>, mut shutdown: Shutdown) {
    loop {
        tokio::select! {
            () = shutdown.wait() => return,
            received = errors.recv() => match received {
                Some(e) => warn!(error = %e, "Worker error"),
                None => return,
            },
        }
    }
}
