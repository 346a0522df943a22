//! Hammer configuration.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::ConfigError;

/// Environment variable consulted when no public key file is given.
pub const PUBLIC_KEY_ENV: &str = "SERVERLESS_LOG_PUBLIC_KEY";

/// Default read rate (ops/sec).
pub const MAX_READ_OPS_DEFAULT: u64 = 20;
/// Default number of random-order readers.
pub const NUM_READERS_RANDOM_DEFAULT: usize = 4;
/// Default number of sequential readers.
pub const NUM_READERS_FULL_DEFAULT: usize = 4;
/// Default chance that a write resubmits the previous leaf.
pub const DUPLICATE_CHANCE_DEFAULT: f64 = 0.1;
/// Default capacity of the error queue.
pub const ERROR_QUEUE_CAPACITY_DEFAULT: usize = 20;
/// Default capacity of the leaf intake queue.
pub const LEAF_QUEUE_CAPACITY_DEFAULT: usize = 256;
/// Default number of leaves remembered by the duplicate analysis.
pub const DEDUP_CACHE_CAPACITY_DEFAULT: usize = 1024;
/// Default interval between checkpoint refreshes.
pub const CHECKPOINT_POLL_INTERVAL_DEFAULT: Duration = Duration::from_secs(1);

/// Configuration for a [`Hammer`](crate::Hammer).
#[derive(Debug, Clone)]
pub struct HammerConfig {
    /// Initial read rate shared by all readers (ops/sec).
    pub max_read_ops: u64,
    /// Initial write rate shared by all writers (ops/sec).
    pub max_write_ops: u64,
    /// Readers fetching random leaves.
    pub num_readers_random: usize,
    /// Readers walking the whole log in order.
    pub num_readers_full: usize,
    /// Writers adding new leaves.
    pub num_writers: usize,
    /// Number of leaves the log stores per bundle.
    pub leaf_bundle_size: u64,
    /// Minimum size in bytes of generated leaves.
    pub leaf_min_size: usize,
    /// Chance (0.0 to 1.0) that a write resubmits the previous leaf.
    pub duplicate_chance: f64,
    /// Capacity of the error queue.
    pub error_queue_capacity: usize,
    /// Capacity of the leaf intake queue.
    pub leaf_queue_capacity: usize,
    /// Number of leaves remembered by the duplicate analysis.
    pub dedup_cache_capacity: usize,
    /// Interval between checkpoint refreshes.
    pub checkpoint_poll_interval: Duration,
}

impl HammerConfig {
    /// Sets the initial read rate.
    #[must_use]
    pub const fn with_max_read_ops(mut self, ops: u64) -> Self {
        self.max_read_ops = ops;
        self
    }

    /// Sets the initial write rate.
    #[must_use]
    pub const fn with_max_write_ops(mut self, ops: u64) -> Self {
        self.max_write_ops = ops;
        self
    }

    /// Sets the initial pool sizes.
    #[must_use]
    pub const fn with_workers(mut self, random_readers: usize, full_readers: usize, writers: usize) -> Self {
        self.num_readers_random = random_readers;
        self.num_readers_full = full_readers;
        self.num_writers = writers;
        self
    }

    /// Sets the log's leaf bundle size.
    #[must_use]
    pub const fn with_leaf_bundle_size(mut self, size: u64) -> Self {
        self.leaf_bundle_size = size;
        self
    }

    /// Sets the minimum generated leaf size.
    #[must_use]
    pub const fn with_leaf_min_size(mut self, size: usize) -> Self {
        self.leaf_min_size = size;
        self
    }

    /// Sets the duplicate injection chance.
    #[must_use]
    pub fn with_duplicate_chance(mut self, chance: f64) -> Self {
        self.duplicate_chance = chance;
        self
    }

    /// Sets the duplicate analysis cache capacity.
    #[must_use]
    pub const fn with_dedup_cache_capacity(mut self, capacity: usize) -> Self {
        self.dedup_cache_capacity = capacity;
        self
    }

    /// Sets the checkpoint refresh interval.
    #[must_use]
    pub const fn with_checkpoint_poll_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_poll_interval = interval;
        self
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leaf_bundle_size == 0 {
            return Err(invalid("leaf_bundle_size must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.duplicate_chance) {
            return Err(invalid(format!(
                "duplicate_chance must be within [0, 1], got {}",
                self.duplicate_chance
            )));
        }
        if self.error_queue_capacity == 0 || self.leaf_queue_capacity == 0 {
            return Err(invalid("queue capacities must be at least 1"));
        }
        if self.dedup_cache_capacity == 0 {
            return Err(invalid("dedup_cache_capacity must be at least 1"));
        }
        if self.checkpoint_poll_interval.is_zero() {
            return Err(invalid("checkpoint_poll_interval must be positive"));
        }
        Ok(())
    }
}

impl Default for HammerConfig {
    fn default() -> Self {
        Self {
            max_read_ops: MAX_READ_OPS_DEFAULT,
            max_write_ops: 0,
            num_readers_random: NUM_READERS_RANDOM_DEFAULT,
            num_readers_full: NUM_READERS_FULL_DEFAULT,
            num_writers: 0,
            leaf_bundle_size: 1,
            leaf_min_size: 0,
            duplicate_chance: DUPLICATE_CHANCE_DEFAULT,
            error_queue_capacity: ERROR_QUEUE_CAPACITY_DEFAULT,
            leaf_queue_capacity: LEAF_QUEUE_CAPACITY_DEFAULT,
            dedup_cache_capacity: DEDUP_CACHE_CAPACITY_DEFAULT,
            checkpoint_poll_interval: CHECKPOINT_POLL_INTERVAL_DEFAULT,
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// A note verifier key: `<name>+<hash>+<base64 key material>`.
///
/// Only the key name is used at runtime, to find the log's signature line
/// on each checkpoint. The key material is validated but never used for
/// signature math.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierKey {
    name: String,
    key_hash: u32,
}

impl VerifierKey {
    /// Parses a verifier key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPublicKey` if any of the three fields is
    /// malformed.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.trim();
        let mut parts = text.splitn(3, '+');
        let (Some(name), Some(hash), Some(key)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid_key("expected <name>+<hash>+<key>"));
        };

        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(invalid_key("key name must be non-empty and contain no spaces"));
        }
        if hash.len() != 8 {
            return Err(invalid_key("key hash must be 8 hex digits"));
        }
        let key_hash = u32::from_str_radix(hash, 16)
            .map_err(|e| invalid_key(format!("key hash is not hex: {e}")))?;
        let material = STANDARD
            .decode(key)
            .map_err(|e| invalid_key(format!("key material is not base64: {e}")))?;
        if material.is_empty() {
            return Err(invalid_key("key material is empty"));
        }

        Ok(Self {
            name: name.to_string(),
            key_hash,
        })
    }

    /// Loads the key from `path`, or from [`PUBLIC_KEY_ENV`] if no path is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the key cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, std::env::var(PUBLIC_KEY_ENV).ok())
    }

    fn load_from(path: Option<&Path>, env_value: Option<String>) -> Result<Self, ConfigError> {
        let text = match path {
            Some(path) => std::fs::read_to_string(path).map_err(|source| ConfigError::PublicKeyRead {
                path: path.display().to_string(),
                source,
            })?,
            None => env_value
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingPublicKey)?,
        };
        Self::parse(&text)
    }

    /// Returns the key name, which is also the signer name on checkpoints.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key hash.
    #[must_use]
    pub const fn key_hash(&self) -> u32 {
        self.key_hash
    }
}

fn invalid_key(reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidPublicKey {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const KEY: &str = "example.com/log+3f8a5c21+AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyA=";

    #[test]
    fn test_default_config_is_valid() {
        let config = HammerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_read_ops, 20);
        assert_eq!(config.dedup_cache_capacity, 1024);
        assert_eq!(config.error_queue_capacity, 20);
        assert_eq!(config.leaf_queue_capacity, 256);
    }

    #[test]
    fn test_zero_bundle_size_rejected() {
        let config = HammerConfig::default().with_leaf_bundle_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_duplicate_chance_out_of_range_rejected() {
        let config = HammerConfig::default().with_duplicate_chance(1.5);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_dedup_cache_rejected() {
        let config = HammerConfig::default().with_dedup_cache_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_verifier_key() {
        let key = VerifierKey::parse(KEY).unwrap();
        assert_eq!(key.name(), "example.com/log");
        assert_eq!(key.key_hash(), 0x3f8a_5c21);
    }

    #[test]
    fn test_parse_verifier_key_rejects_garbage() {
        assert!(VerifierKey::parse("no-plus-signs").is_err());
        assert!(VerifierKey::parse("+3f8a5c21+AQID").is_err());
        assert!(VerifierKey::parse("name+xyz+AQID").is_err());
        assert!(VerifierKey::parse("name+3f8a5c21+!!!").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{KEY}").unwrap();

        let key = VerifierKey::load_from(Some(file.path()), None).unwrap();
        assert_eq!(key.name(), "example.com/log");
    }

    #[test]
    fn test_load_from_env_value() {
        let key = VerifierKey::load_from(None, Some(KEY.to_string())).unwrap();
        assert_eq!(key.name(), "example.com/log");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(matches!(
            VerifierKey::load_from(None, None),
            Err(ConfigError::MissingPublicKey)
        ));
        assert!(matches!(
            VerifierKey::load_from(None, Some("  ".to_string())),
            Err(ConfigError::MissingPublicKey)
        ));
    }

    #[test]
    fn test_unreadable_key_file() {
        let err = VerifierKey::load_from(Some(Path::new("/nonexistent/hammer.pub")), None).unwrap_err();
        assert!(matches!(err, ConfigError::PublicKeyRead { .. }));
    }
}
