//! Integration tests for the hammer against an in-memory log.
//!
//! The log serves checkpoints and leaves through the same paths a real
//! static log does, so the full stack runs: checkpoint tracker, round-robin
//! fetcher, readers, writers, throttles and duplicate analysis.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use hammer_core::ShutdownTrigger;
use hammer_workload::{
    seq_path, CheckpointTracker, FetchError, Fetcher, Hammer, HammerConfig, HammerError,
    LeafAdder, LogStateTracker, RoundRobinFetcher, WriteError,
};

const ORIGIN: &str = "example.com/log";

fn checkpoint(size: u64, root: &str) -> Bytes {
    Bytes::from(format!(
        "{ORIGIN}\n{size}\n{}\n\n\u{2014} {ORIGIN} c2lnbmF0dXJl\n",
        STANDARD.encode(root)
    ))
}

/// A log with bundle size 1. Optionally assigns each payload a single index.
struct MemoryLog {
    deduplicate: bool,
    leaves: Mutex<Vec<Bytes>>,
    indices: Mutex<HashMap<Bytes, u64>>,
}

impl MemoryLog {
    fn new(deduplicate: bool, initial: &[&str]) -> Arc<Self> {
        let log = Arc::new(Self {
            deduplicate,
            leaves: Mutex::new(Vec::new()),
            indices: Mutex::new(HashMap::new()),
        });
        for leaf in initial {
            log.append(Bytes::copy_from_slice(leaf.as_bytes()));
        }
        log
    }

    fn append(&self, data: Bytes) -> u64 {
        let mut indices = self.indices.lock().unwrap();
        if self.deduplicate {
            if let Some(index) = indices.get(&data) {
                return *index;
            }
        }
        let mut leaves = self.leaves.lock().unwrap();
        let index = leaves.len() as u64;
        leaves.push(data.clone());
        indices.entry(data).or_insert(index);
        index
    }

    fn size(&self) -> usize {
        self.leaves.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for MemoryLog {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let leaves = self.leaves.lock().unwrap();
        if path == "checkpoint" {
            let size = leaves.len() as u64;
            return Ok(checkpoint(size, &format!("root-{size}")));
        }
        (0..leaves.len() as u64)
            .find(|index| seq_path(*index, None) == path)
            .map(|index| leaves[index as usize].clone())
            .ok_or_else(|| FetchError::NotFound {
                path: path.to_string(),
            })
    }
}

#[async_trait]
impl LeafAdder for MemoryLog {
    async fn add(&self, data: Bytes) -> Result<u64, WriteError> {
        Ok(self.append(data))
    }
}

/// Serves a fixed sequence of checkpoints, then keeps failing.
struct Checkpoints(Mutex<Vec<Result<Bytes, u16>>>);

#[async_trait]
impl Fetcher for Checkpoints {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let mut script = self.0.lock().unwrap();
        let next = if script.is_empty() { Err(503) } else { script.remove(0) };
        next.map_err(|status| FetchError::Status {
            status,
            url: path.to_string(),
        })
    }
}

#[async_trait]
impl LeafAdder for Checkpoints {
    async fn add(&self, _data: Bytes) -> Result<u64, WriteError> {
        Err(WriteError::Status {
            status: 405,
            body: String::new(),
        })
    }
}

async fn start(
    config: HammerConfig,
    fetcher: Arc<dyn Fetcher>,
    adder: Arc<dyn LeafAdder>,
) -> (Arc<Hammer>, ShutdownTrigger, tokio::task::JoinHandle<Result<(), HammerError>>) {
    let tracker = Arc::new(CheckpointTracker::new(Arc::clone(&fetcher), ORIGIN, ORIGIN));
    tracker.update().await.unwrap();

    let hammer = Arc::new(Hammer::new(config, tracker, fetcher, adder).unwrap());
    let trigger = ShutdownTrigger::new();
    let runner = {
        let hammer = Arc::clone(&hammer);
        let shutdown = trigger.subscribe();
        tokio::spawn(async move { hammer.run(shutdown).await })
    };
    (hammer, trigger, runner)
}

fn mirrors(log: &Arc<MemoryLog>, count: usize) -> Arc<dyn Fetcher> {
    let fetchers = (0..count)
        .map(|_| Arc::clone(log) as Arc<dyn Fetcher>)
        .collect();
    Arc::new(RoundRobinFetcher::new(fetchers).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_deduplicating_log_shows_no_duplicates() {
    let log = MemoryLog::new(true, &["a", "b", "c"]);
    let config = HammerConfig::default()
        .with_max_read_ops(50)
        .with_max_write_ops(50)
        .with_workers(2, 2, 3)
        .with_leaf_min_size(16)
        .with_duplicate_chance(0.5);
    let (hammer, trigger, runner) = start(config, mirrors(&log, 2), log.clone()).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    trigger.trigger();
    runner.await.unwrap().unwrap();

    assert!(log.size() > 100, "writers added only {} leaves", log.size());
    assert_eq!(hammer.status().duplicates, 0);
}

#[tokio::test(start_paused = true)]
async fn test_non_deduplicating_log_is_caught() {
    let log = MemoryLog::new(false, &[]);
    let config = HammerConfig::default()
        .with_max_read_ops(50)
        .with_max_write_ops(50)
        .with_workers(1, 1, 2)
        .with_duplicate_chance(0.5);
    let (hammer, trigger, runner) = start(config, mirrors(&log, 1), log.clone()).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    trigger.trigger();
    runner.await.unwrap().unwrap();

    assert!(hammer.status().duplicates > 0);
}

#[tokio::test(start_paused = true)]
async fn test_shrinking_checkpoint_stops_the_hammer() {
    let good = checkpoint(5, "five");
    let bad = checkpoint(3, "three");
    let fetcher = Arc::new(Checkpoints(Mutex::new(vec![
        Ok(good.clone()),
        Err(500),
        Ok(good.clone()),
        Ok(bad.clone()),
    ])));
    let config = HammerConfig::default().with_workers(0, 0, 0);
    let (_hammer, _trigger, runner) = start(config, fetcher.clone(), fetcher).await;

    let err = tokio::time::timeout(Duration::from_secs(30), runner)
        .await
        .expect("hammer should stop on its own")
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, HammerError::Inconsistent { .. }));
    let report = err.to_string();
    assert!(report.contains(&String::from_utf8_lossy(&good).to_string()));
    assert!(report.contains(&String::from_utf8_lossy(&bad).to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_transient_tracker_errors_are_survived() {
    let fetcher = Arc::new(Checkpoints(Mutex::new(vec![Ok(checkpoint(5, "five"))])));
    let config = HammerConfig::default().with_workers(1, 1, 0);
    let (hammer, trigger, runner) = start(config, fetcher.clone(), fetcher).await;

    // Every refresh and every read fails from here on.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!runner.is_finished());
    assert_eq!(hammer.status().random_readers, 1);

    trigger.trigger();
    runner.await.unwrap().unwrap();
}
