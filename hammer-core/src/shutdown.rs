//! Process-wide shutdown signalling.
//!
//! A single [`ShutdownTrigger`] fans out to any number of [`Shutdown`]
//! receivers. Once triggered the signal stays set, so tasks that subscribe
//! late still observe it. Dropping the trigger also counts as shutdown.

use tokio::sync::watch;

/// The sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns a receiver for this signal.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Signals shutdown to every receiver.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once `trigger` has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving half of the shutdown signal.
///
/// Cheap to clone; every task holds its own copy.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Returns true if shutdown has been signalled.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once shutdown is signalled or the trigger is dropped.
    ///
    /// Cancel safe, so it can sit in any `tokio::select!` arm.
    pub async fn wait(&mut self) {
        // An error means the trigger is gone, which is treated as shutdown.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
