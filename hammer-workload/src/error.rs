//! Error types for the hammer workload.
//!
//! Worker errors are transient: they are reported on the error queue, logged,
//! and never acted on. Configuration errors stop the hammer before any worker
//! starts. An inconsistency reported by the log-state tracker stops it at any
//! time.

use bytes::Bytes;
use thiserror::Error;

/// Errors returned by a [`Fetcher`](crate::Fetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The resource does not exist (HTTP 404 or a missing file).
    #[error("not found: {path}")]
    NotFound {
        /// The requested location.
        path: String,
    },

    /// The server answered with a status other than 200 or 404.
    #[error("unexpected http status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The requested URL.
        url: String,
    },

    /// The path could not be resolved against the fetcher root.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The requested path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file read failure.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Returns true if the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by a [`LeafAdder`](crate::LeafAdder).
#[derive(Debug, Error)]
pub enum WriteError {
    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The log did not accept the leaf.
    #[error("write leaf was not OK: status {status}, body {body:?}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The log accepted the leaf but the assigned index could not be parsed.
    #[error("failed to parse write response {body:?}")]
    MalformedResponse {
        /// Response body.
        body: String,
    },
}

/// A transient failure of one read or write attempt.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A leaf could not be fetched.
    #[error("failed to get leaf {index}: {source}")]
    Read {
        /// The leaf that was requested.
        index: u64,
        /// Underlying fetch error.
        #[source]
        source: FetchError,
    },

    /// A leaf bundle was fetched but could not be decoded.
    #[error("malformed leaf bundle {bundle_index}: {reason}")]
    MalformedBundle {
        /// Index of the bundle.
        bundle_index: u64,
        /// Description of the problem.
        reason: String,
    },

    /// A leaf could not be written.
    #[error("failed to write leaf: {0}")]
    Write(#[from] WriteError),
}

/// Errors returned by a [`LogStateTracker`](crate::LogStateTracker).
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The checkpoint could not be fetched.
    #[error("failed to fetch checkpoint: {0}")]
    Fetch(#[from] FetchError),

    /// The checkpoint text could not be parsed.
    #[error("malformed checkpoint: {reason}")]
    MalformedCheckpoint {
        /// Description of the problem.
        reason: String,
    },

    /// The checkpoint belongs to a different log.
    #[error("checkpoint origin {actual:?} does not match expected {expected:?}")]
    OriginMismatch {
        /// Configured origin.
        expected: String,
        /// Origin line of the checkpoint.
        actual: String,
    },

    /// The checkpoint is not signed by the configured key.
    #[error("checkpoint carries no signature from {key_name:?}")]
    MissingSignature {
        /// Name of the configured verifier key.
        key_name: String,
    },

    /// Two observed checkpoints cannot both belong to one append-only log.
    #[error("inconsistent checkpoints: {reason}")]
    Inconsistent {
        /// Raw text of the checkpoint with the smaller tree.
        smaller_raw: Bytes,
        /// Raw text of the checkpoint with the larger tree.
        larger_raw: Bytes,
        /// Description of the conflict.
        reason: String,
    },
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No log location was supplied.
    #[error("at least one log url must be provided")]
    NoLogUrl,

    /// A log location could not be parsed.
    #[error("invalid log url {url:?}: {reason}")]
    InvalidLogUrl {
        /// The rejected value.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A log location uses a scheme with no transport.
    #[error("unsupported url scheme {scheme:?}")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// The public key file could not be read.
    #[error("failed to read public key from {path}: {source}")]
    PublicKeyRead {
        /// The key file.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No public key was supplied.
    #[error("supply a public key file with --log-public-key or set SERVERLESS_LOG_PUBLIC_KEY")]
    MissingPublicKey,

    /// The public key text is malformed.
    #[error("invalid public key: {reason}")]
    InvalidPublicKey {
        /// Description of the problem.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Errors that stop a running hammer.
#[derive(Debug, Error)]
pub enum HammerError {
    /// The log published two checkpoints that cannot both be valid.
    #[error(
        "log inconsistency detected: {}\n\nSmaller Checkpoint:\n{}\n\nLarger Checkpoint:\n{}",
        .reason,
        String::from_utf8_lossy(.smaller_raw),
        String::from_utf8_lossy(.larger_raw)
    )]
    Inconsistent {
        /// Raw text of the checkpoint with the smaller tree.
        smaller_raw: Bytes,
        /// Raw text of the checkpoint with the larger tree.
        larger_raw: Bytes,
        /// Description of the conflict.
        reason: String,
    },

    /// `run` was called more than once.
    #[error("hammer is already running")]
    AlreadyRunning,

    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for hammer operations.
pub type HammerResult<T> = Result<T, HammerError>;
