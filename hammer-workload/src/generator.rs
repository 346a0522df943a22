//! Leaf payload generation.
//!
//! Each payload is `hex(filler) + " " + index`, where the filler is random
//! and sized so the hex text reaches the configured minimum leaf size. The
//! embedded index keeps payloads distinct across indices even when the
//! filler is empty.
//!
//! To exercise the log's deduplication, a configurable fraction of calls
//! hands back the pending payload without advancing: the *next* call then
//! returns the same bytes again, so the log sees one payload submitted twice.

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Builds the payload for `index`.
fn gen_leaf<R: Rng>(index: u64, min_leaf_size: usize, rng: &mut R) -> Bytes {
    // Half as many random bytes as requested; hex encoding doubles them.
    let mut filler = vec![0u8; min_leaf_size / 2];
    rng.fill(&mut filler[..]);
    Bytes::from(format!("{} {index}", hex::encode(filler)))
}

/// Stateful producer of leaf payloads.
///
/// Not synchronized. Writers sharing one generator wrap it in a mutex.
#[derive(Debug)]
pub struct LeafGenerator {
    /// The payload the next advancing call returns.
    next_leaf: Bytes,
    /// Index embedded in `next_leaf`.
    next_index: u64,
    min_leaf_size: usize,
    duplicate_chance: f64,
    rng: ChaCha8Rng,
}

impl LeafGenerator {
    /// Creates a generator starting at `start_index`, seeded from entropy.
    ///
    /// `start_index` is normally the log size when the hammer starts.
    #[must_use]
    pub fn new(start_index: u64, min_leaf_size: usize, duplicate_chance: f64) -> Self {
        Self::with_rng(
            start_index,
            min_leaf_size,
            duplicate_chance,
            ChaCha8Rng::from_entropy(),
        )
    }

    /// Creates a generator with a deterministic seed.
    #[must_use]
    pub fn with_seed(start_index: u64, min_leaf_size: usize, duplicate_chance: f64, seed: u64) -> Self {
        Self::with_rng(
            start_index,
            min_leaf_size,
            duplicate_chance,
            ChaCha8Rng::seed_from_u64(seed),
        )
    }

    fn with_rng(start_index: u64, min_leaf_size: usize, duplicate_chance: f64, mut rng: ChaCha8Rng) -> Self {
        let next_leaf = gen_leaf(start_index, min_leaf_size, &mut rng);
        Self {
            next_leaf,
            next_index: start_index,
            min_leaf_size,
            duplicate_chance,
            rng,
        }
    }

    /// Returns the index embedded in the pending payload.
    #[must_use]
    pub const fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Returns the next payload to submit.
    pub fn next_leaf(&mut self) -> Bytes {
        if self.rng.gen::<f64>() < self.duplicate_chance {
            // Returned now and again by the next advancing call.
            return self.next_leaf.clone();
        }

        self.next_index += 1;
        let fresh = gen_leaf(self.next_index, self.min_leaf_size, &mut self.rng);
        std::mem::replace(&mut self.next_leaf, fresh)
    }
}
