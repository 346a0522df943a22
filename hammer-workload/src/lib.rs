//! Hammer Workload: load generation for verifiable append-only logs
//!
//! The hammer drives a log from three directions at once:
//!
//! 1. **Writers** add generated leaves, occasionally resubmitting one to
//!    exercise the log's deduplication
//! 2. **Readers** fetch leaves back, some at random and some walking the
//!    whole tree, spread across every configured mirror
//! 3. **A tracker** refreshes the log's checkpoint once a second and stops
//!    everything if two checkpoints contradict each other
//!
//! Every leaf that a reader or writer sees is fed to a [`LeafConsumer`],
//! which counts contents that appear at two different indices.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hammer_workload::{
//!     fetcher_for_root, http_client, parse_root, CheckpointTracker, Hammer, HammerConfig,
//!     HttpLeafAdder, LogStateTracker, RoundRobinFetcher,
//! };
//!
//! let client = http_client()?;
//! let root = parse_root("https://log.example/")?;
//! let fetcher = Arc::new(RoundRobinFetcher::new(vec![fetcher_for_root(&root, &client, None)?]).unwrap());
//! let tracker = Arc::new(CheckpointTracker::new(fetcher.clone(), "log.example", "log.example"));
//! tracker.update().await?;
//!
//! let adder = Arc::new(HttpLeafAdder::new(client, &root, None)?);
//! let hammer = Hammer::new(HammerConfig::default().with_max_write_ops(10), tracker, fetcher, adder)?;
//! hammer.run(shutdown).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod consumer;
mod generator;
mod hammer;
mod pool;
mod reader;
mod writer;

pub mod config;
pub mod error;
pub mod fetcher;
pub mod tracker;
pub mod transport;

pub use config::{HammerConfig, VerifierKey};
pub use consumer::{LeafConsumer, Observation};
pub use error::{
    ConfigError, FetchError, HammerError, HammerResult, TrackerError, WorkerError, WriteError,
};
pub use fetcher::{Fetcher, RoundRobinFetcher};
pub use generator::LeafGenerator;
pub use hammer::{Hammer, HammerStatus};
pub use pool::{Worker, WorkerFactory, WorkerPool};
pub use reader::{seq_path, LeafReader, ReadOrder};
pub use tracker::{Checkpoint, CheckpointTracker, LogStateTracker};
pub use transport::{fetcher_for_root, http_client, parse_root, FileFetcher, HttpFetcher, HttpLeafAdder};
pub use writer::{LeafAdder, LeafWriter};
