//! Hammer: load generator for verifiable append-only logs.
//!
//! Reads from one or more mirrors of a log, optionally writes to it, and
//! exits with status 1 if the log ever publishes two inconsistent
//! checkpoints.
//!
//! ```bash
//! # Read-only load against two mirrors.
//! hammer --log-url https://mirror-a.example/log/ --log-url https://mirror-b.example/log/ \
//!     --log-public-key log.pub
//!
//! # Read and write, with runtime controls on stdin.
//! SERVERLESS_LOG_PUBLIC_KEY="$(cat log.pub)" hammer --log-url http://localhost:2024/ \
//!     --max-write-ops 50 --num-writers 8 --interactive
//! ```
//!
//! Interactive controls, one or more per line: `+`/`-` read rate, `>`/`<`
//! write rate, `w`/`W` add or remove one worker from every pool.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hammer_core::{Shutdown, ShutdownTrigger};
use hammer_workload::{
    fetcher_for_root, http_client, parse_root, CheckpointTracker, ConfigError, Fetcher, Hammer,
    HammerConfig, HttpLeafAdder, LogStateTracker, RoundRobinFetcher, VerifierKey,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Hammer load generator.
#[derive(Parser, Debug)]
#[command(name = "hammer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log root URL (http, https or file). Repeat for mirrors; writes go to
    /// the last one.
    #[arg(long = "log-url", required = true)]
    log_urls: Vec<String>,

    /// Bearer token sent with every request.
    #[arg(long)]
    bearer_token: Option<String>,

    /// File holding the log's public key. Falls back to the
    /// SERVERLESS_LOG_PUBLIC_KEY environment variable.
    #[arg(long)]
    log_public_key: Option<PathBuf>,

    /// Expected checkpoint origin. Defaults to the public key name.
    #[arg(long)]
    origin: Option<String>,

    /// Initial read rate (ops/sec) shared by all readers.
    #[arg(long, default_value = "20")]
    max_read_ops: u64,

    /// Readers fetching random leaves.
    #[arg(long, default_value = "4")]
    num_readers_random: usize,

    /// Readers walking the whole log.
    #[arg(long, default_value = "4")]
    num_readers_full: usize,

    /// Initial write rate (ops/sec) shared by all writers.
    #[arg(long, default_value = "0")]
    max_write_ops: u64,

    /// Writers adding new leaves.
    #[arg(long, default_value = "0")]
    num_writers: usize,

    /// Leaves per bundle in the log's storage layout.
    #[arg(long, default_value = "1")]
    leaf_bundle_size: u64,

    /// Minimum size in bytes of generated leaves.
    #[arg(long, default_value = "0")]
    leaf_min_size: usize,

    /// Chance (0.0 to 1.0) that a write resubmits the previous leaf.
    #[arg(long, default_value = "0.1")]
    duplicate_chance: f64,

    /// Leaves remembered by the duplicate analysis.
    #[arg(long, default_value = "1024")]
    dedup_cache_size: usize,

    /// Seconds between status reports.
    #[arg(long, default_value = "5")]
    status_interval_secs: u64,

    /// Read rate and worker controls from stdin.
    #[arg(long)]
    interactive: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

impl Args {
    fn hammer_config(&self) -> HammerConfig {
        HammerConfig::default()
            .with_max_read_ops(self.max_read_ops)
            .with_max_write_ops(self.max_write_ops)
            .with_workers(self.num_readers_random, self.num_readers_full, self.num_writers)
            .with_leaf_bundle_size(self.leaf_bundle_size)
            .with_leaf_min_size(self.leaf_min_size)
            .with_duplicate_chance(self.duplicate_chance)
            .with_dedup_cache_capacity(self.dedup_cache_size)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Err(e) = run(args).await {
        error!("Hammer failed");
        eprintln!("{e}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let key = VerifierKey::load(args.log_public_key.as_deref())?;
    let origin = args.origin.clone().unwrap_or_else(|| key.name().to_string());

    let client = http_client()?;
    let roots = args
        .log_urls
        .iter()
        .map(|url| parse_root(url))
        .collect::<Result<Vec<_>, _>>()?;
    let write_root = roots.last().ok_or(ConfigError::NoLogUrl)?;
    let bearer_token = args.bearer_token.as_deref();
    let mirrors = roots
        .iter()
        .map(|root| fetcher_for_root(root, &client, bearer_token))
        .collect::<Result<Vec<_>, _>>()?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(RoundRobinFetcher::new(mirrors).ok_or(ConfigError::NoLogUrl)?);

    let tracker = Arc::new(CheckpointTracker::new(Arc::clone(&fetcher), origin.as_str(), key.name()));
    let initial = tracker.update().await.map_err(|e| format!("failed to get initial state of the log: {e}"))?;
    info!(
        origin = %origin,
        size = initial.size,
        mirrors = roots.len(),
        write_url = %write_root,
        "Fetched initial checkpoint"
    );

    let adder = Arc::new(HttpLeafAdder::new(client, write_root, args.bearer_token.clone())?);
    let hammer = Arc::new(Hammer::new(args.hammer_config(), tracker, fetcher, adder)?);

    let trigger = Arc::new(ShutdownTrigger::new());
    {
        let trigger = Arc::clone(&trigger);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
            }
            trigger.trigger();
        });
    }

    let status_interval = Duration::from_secs(args.status_interval_secs.max(1));
    tokio::spawn(report_status(Arc::clone(&hammer), status_interval, trigger.subscribe()));
    if args.interactive {
        tokio::spawn(read_controls(Arc::clone(&hammer), trigger.subscribe()));
    }

    hammer.run(trigger.subscribe()).await?;
    info!("Hammer stopped");
    Ok(())
}

async fn report_status(hammer: Arc<Hammer>, interval: Duration, mut shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.wait() => return,
            _ = ticker.tick() => info!("\n{}", hammer.status()),
        }
    }
}

async fn read_controls(hammer: Arc<Hammer>, mut shutdown: Shutdown) {
    info!("Controls: +/- read rate, >/< write rate, w/W workers");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.wait() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read controls from stdin");
                return;
            }
        };

        for control in line.chars() {
            match control {
                '+' => {
                    hammer.increase_read_rate();
                }
                '-' => {
                    hammer.decrease_read_rate();
                }
                '>' => {
                    hammer.increase_write_rate();
                }
                '<' => {
                    hammer.decrease_write_rate();
                }
                'w' => hammer.grow_workers(&shutdown),
                'W' => hammer.shrink_workers(),
                c if c.is_whitespace() => {}
                other => warn!(control = %other, "Unknown control"),
            }
        }
    }
}
