//! Tracking the log's published state.
//!
//! The hammer only needs two things from a tracker: the size of the latest
//! checkpoint it has accepted, and a way to refresh it. A tracker that finds
//! two checkpoints which cannot both belong to one append-only log reports
//! `TrackerError::Inconsistent`, and the hammer stops.
//!
//! [`CheckpointTracker`] is the tracker shipped with the binary. It checks
//! what can be checked from checkpoints alone: the origin line, the
//! presence of a signature line from the configured key, that the tree
//! never shrinks, and that one size never maps to two root hashes. It does
//! not verify consistency proofs or signatures; a tracker that does plugs in
//! through the same trait.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use tracing::debug;

use crate::error::TrackerError;
use crate::fetcher::Fetcher;

/// Path of the checkpoint relative to the log root.
pub const CHECKPOINT_PATH: &str = "checkpoint";

/// Prefix of a signature line in a signed note.
const SIGNATURE_PREFIX: &str = "\u{2014} ";

/// A parsed checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// First line: identifies the log.
    pub origin: String,
    /// Number of leaves committed to.
    pub size: u64,
    /// Root hash of the tree at `size`.
    pub root_hash: Bytes,
    /// Names of the keys that signed the checkpoint.
    pub signers: Vec<String>,
    /// The checkpoint exactly as fetched.
    pub raw: Bytes,
}

impl Checkpoint {
    /// Parses a signed checkpoint note.
    ///
    /// ```text
    /// <origin>
    /// <size>
    /// <base64 root hash>
    /// [extension lines]
    ///
    /// — <signer> <base64 signature>
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::MalformedCheckpoint` if the body lines are
    /// missing or invalid.
    pub fn parse(raw: Bytes) -> Result<Self, TrackerError> {
        let text = std::str::from_utf8(&raw).map_err(|_| malformed("not valid UTF-8"))?;
        let (body, signatures) = text.split_once("\n\n").unwrap_or((text, ""));

        let mut lines = body.lines();
        let origin = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| malformed("missing origin line"))?;
        let size = lines
            .next()
            .ok_or_else(|| malformed("missing size line"))?
            .parse::<u64>()
            .map_err(|e| malformed(format!("invalid size: {e}")))?;
        let root_hash = lines
            .next()
            .ok_or_else(|| malformed("missing root hash line"))
            .and_then(|line| {
                STANDARD
                    .decode(line)
                    .map_err(|e| malformed(format!("invalid root hash: {e}")))
            })?;

        let signers = signatures
            .lines()
            .filter_map(|line| line.strip_prefix(SIGNATURE_PREFIX))
            .filter_map(|rest| rest.split_whitespace().next())
            .map(str::to_string)
            .collect();

        Ok(Self {
            origin: origin.to_string(),
            size,
            root_hash: Bytes::from(root_hash),
            signers,
            raw: raw.clone(),
        })
    }
}

fn malformed(reason: impl Into<String>) -> TrackerError {
    TrackerError::MalformedCheckpoint {
        reason: reason.into(),
    }
}

/// Keeps track of the latest consistent state of the log.
#[async_trait]
pub trait LogStateTracker: Send + Sync {
    /// Returns the latest accepted checkpoint.
    ///
    /// Before the first successful update this is an empty checkpoint of
    /// size zero.
    fn latest_consistent(&self) -> Checkpoint;

    /// Fetches the current checkpoint and accepts it if consistent.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Inconsistent` when the new checkpoint conflicts
    /// with the accepted one; any other error is transient.
    async fn update(&self) -> Result<Checkpoint, TrackerError>;
}

/// Checkpoint-only tracker used by the `hammer` binary.
pub struct CheckpointTracker {
    fetcher: Arc<dyn Fetcher>,
    origin: String,
    key_name: String,
    latest: RwLock<Option<Checkpoint>>,
}

impl CheckpointTracker {
    /// Creates a tracker. No checkpoint is fetched until `update`.
    ///
    /// An empty `origin` accepts any origin line.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, origin: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            fetcher,
            origin: origin.into(),
            key_name: key_name.into(),
            latest: RwLock::new(None),
        }
    }

    fn check(&self, checkpoint: &Checkpoint) -> Result<(), TrackerError> {
        if !self.origin.is_empty() && checkpoint.origin != self.origin {
            return Err(TrackerError::OriginMismatch {
                expected: self.origin.clone(),
                actual: checkpoint.origin.clone(),
            });
        }
        if !checkpoint.signers.iter().any(|signer| *signer == self.key_name) {
            return Err(TrackerError::MissingSignature {
                key_name: self.key_name.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for CheckpointTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointTracker")
            .field("origin", &self.origin)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogStateTracker for CheckpointTracker {
    fn latest_consistent(&self) -> Checkpoint {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    async fn update(&self) -> Result<Checkpoint, TrackerError> {
        let raw = self.fetcher.fetch(CHECKPOINT_PATH).await?;
        let checkpoint = Checkpoint::parse(raw)?;
        self.check(&checkpoint)?;

        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = latest.as_ref() {
            if checkpoint.size < current.size {
                return Err(TrackerError::Inconsistent {
                    smaller_raw: checkpoint.raw.clone(),
                    larger_raw: current.raw.clone(),
                    reason: format!("tree shrank from {} to {}", current.size, checkpoint.size),
                });
            }
            if checkpoint.size == current.size && checkpoint.root_hash != current.root_hash {
                return Err(TrackerError::Inconsistent {
                    smaller_raw: current.raw.clone(),
                    larger_raw: checkpoint.raw.clone(),
                    reason: format!("two root hashes for tree size {}", checkpoint.size),
                });
            }
            if checkpoint.size == current.size {
                return Ok(current.clone());
            }
        }

        debug!(size = checkpoint.size, "Accepted checkpoint");
        *latest = Some(checkpoint.clone());
        Ok(checkpoint)
    }
}
