//! Per-second token throttle.
//!
//! A throttle is a token bucket with a strict one-interval budget. Once per
//! [`REFILL_INTERVAL`] the refill loop tries to push `ops_per_second` tokens
//! into a queue bounded at the same size. Tokens that cannot be pushed before
//! the interval ends are dropped rather than carried into the next interval,
//! so the issued rate is always measured per wall-clock second and never
//! drifts. The number of dropped tokens is the oversupply: a high value
//! means the workers cannot keep up with the configured rate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hammer_core::Shutdown;
use tokio::sync::{Notify, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

use crate::error::{FlowError, FlowResult};

/// Length of one refill cycle.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Rate adjustments move the rate by `1 / RATE_STEP_DIVISOR` of its value.
const RATE_STEP_DIVISOR: u64 = 10;

/// Snapshot of a throttle for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStats {
    /// Target tokens per second.
    pub ops_per_second: u64,
    /// Tokens that could not be issued during the last refill cycle.
    pub oversupply: u64,
}

impl fmt::Display for ThrottleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Current max: {}/s. Oversupply in last second: {}",
            self.ops_per_second, self.oversupply
        )
    }
}

/// A rate limiter issuing up to `ops_per_second` tokens per second.
///
/// All methods take `&self`; a throttle is shared between its refill task,
/// every worker drawing tokens from it, and whatever adjusts the rate.
#[derive(Debug)]
pub struct Throttle {
    /// Target rate. Read at the start of every refill cycle.
    ops_per_second: AtomicU64,

    /// Tokens dropped during the last refill cycle.
    oversupply: AtomicU64,

    /// Queued tokens. Available permits are tokens waiting for a worker.
    tokens: Semaphore,

    /// Signalled whenever a worker takes a token, freeing queue space.
    token_taken: Notify,
}

impl Throttle {
    /// Creates a throttle with the given target rate.
    ///
    /// No tokens are issued until [`Throttle::run`] is driven. A rate of
    /// zero issues nothing; workers wait until the rate is increased.
    #[must_use]
    pub fn new(ops_per_second: u64) -> Self {
        Self {
            ops_per_second: AtomicU64::new(ops_per_second),
            oversupply: AtomicU64::new(0),
            tokens: Semaphore::new(0),
            token_taken: Notify::new(),
        }
    }

    /// Returns the current target rate.
    #[must_use]
    pub fn ops_per_second(&self) -> u64 {
        self.ops_per_second.load(Ordering::Acquire)
    }

    /// Returns the oversupply measured during the last refill cycle.
    #[must_use]
    pub fn oversupply(&self) -> u64 {
        self.oversupply.load(Ordering::Relaxed)
    }

    /// Returns the number of tokens currently waiting for a worker.
    #[must_use]
    pub fn queued_tokens(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Returns a snapshot for status reporting.
    #[must_use]
    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            ops_per_second: self.ops_per_second(),
            oversupply: self.oversupply(),
        }
    }

    /// Waits for one token.
    ///
    /// Never times out on its own.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Shutdown` once the refill loop has stopped.
    pub async fn acquire(&self) -> FlowResult<()> {
        let permit = self
            .tokens
            .acquire()
            .await
            .map_err(|_| FlowError::Shutdown)?;
        permit.forget();
        self.token_taken.notify_one();
        Ok(())
    }

    /// Raises the rate by 10%, at least by one. Returns the new rate.
    ///
    /// Takes effect at the start of the next refill cycle.
    pub fn increase(&self) -> u64 {
        let previous = self
            .ops_per_second
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rate| {
                Some(rate.saturating_add(rate_step(rate)))
            })
            .unwrap_or_else(|rate| rate);
        previous.saturating_add(rate_step(previous))
    }

    /// Lowers the rate by 10%, at least by one. Returns the new rate.
    ///
    /// A rate at or below one is left unchanged, so a positive rate never
    /// drops to zero. Takes effect at the start of the next refill cycle.
    pub fn decrease(&self) -> u64 {
        match self
            .ops_per_second
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rate| {
                (rate > 1).then(|| rate - rate_step(rate))
            }) {
            Ok(previous) => previous - rate_step(previous),
            Err(unchanged) => unchanged,
        }
    }

    /// Runs the refill loop until shutdown.
    ///
    /// On return the token queue is closed and every pending or future
    /// [`Throttle::acquire`] fails with `FlowError::Shutdown`.
    pub async fn run(&self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval_at(Instant::now() + REFILL_INTERVAL, REFILL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            let target = self.ops_per_second();
            let deadline = Instant::now() + REFILL_INTERVAL;
            tokio::select! {
                () = shutdown.wait() => break,
                supplied = self.refill(target, deadline) => {
                    let oversupply = target - supplied;
                    self.oversupply.store(oversupply, Ordering::Relaxed);
                    trace!(target_rate = target, supplied, oversupply, "Refill cycle complete");
                }
            }
        }

        self.tokens.close();
    }

    /// Pushes up to `target` tokens before `deadline`. Returns how many fit.
    ///
    /// The queue never holds more than `target` tokens; leftovers from a
    /// higher previous rate are discarded first.
    pub(crate) async fn refill(&self, target: u64, deadline: Instant) -> u64 {
        let capacity = usize::try_from(target).unwrap_or(usize::MAX);
        self.discard_above(capacity);

        let mut supplied = 0;
        while supplied < target {
            // Created before the capacity check so a token taken in between
            // is not missed; notify_one stores the wakeup.
            let taken = self.token_taken.notified();
            if self.tokens.available_permits() < capacity {
                self.tokens.add_permits(1);
                supplied += 1;
                continue;
            }

            tokio::select! {
                () = taken => {}
                () = tokio::time::sleep_until(deadline) => break,
            }
        }
        supplied
    }

    fn discard_above(&self, capacity: usize) {
        let excess = self.tokens.available_permits().saturating_sub(capacity);
        if excess == 0 {
            return;
        }
        let excess = u32::try_from(excess).unwrap_or(u32::MAX);
        if let Ok(permits) = self.tokens.try_acquire_many(excess) {
            permits.forget();
        }
    }
}

impl fmt::Display for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.stats().fmt(f)
    }
}

const fn rate_step(rate: u64) -> u64 {
    let step = rate / RATE_STEP_DIVISOR;
    if step < 1 {
        1
    } else {
        step
    }
}
