//! Read access to the log's static resources.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

/// Fetches a resource by path relative to a log root.
///
/// Implementations must map "does not exist" to `FetchError::NotFound` so
/// callers can tell a missing resource from a failing mirror.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the resource at `path`.
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError>;
}

/// Spreads fetches across several mirrors of the same log.
///
/// Each call goes to the next mirror in strict rotation, whatever the
/// concurrency of the callers. Results, including errors, are returned
/// unchanged.
pub struct RoundRobinFetcher {
    fetchers: Vec<Arc<dyn Fetcher>>,
    next: Mutex<usize>,
}

impl RoundRobinFetcher {
    /// Creates a fetcher rotating over `fetchers`.
    ///
    /// Returns `None` if `fetchers` is empty.
    #[must_use]
    pub fn new(fetchers: Vec<Arc<dyn Fetcher>>) -> Option<Self> {
        if fetchers.is_empty() {
            return None;
        }
        Some(Self {
            fetchers,
            next: Mutex::new(0),
        })
    }

    /// Returns the number of mirrors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    /// Always false; construction rejects an empty mirror list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    fn next_fetcher(&self) -> Arc<dyn Fetcher> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let fetcher = Arc::clone(&self.fetchers[*next]);
        *next = (*next + 1) % self.fetchers.len();
        fetcher
    }
}

impl std::fmt::Debug for RoundRobinFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinFetcher")
            .field("mirrors", &self.fetchers.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Fetcher for RoundRobinFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let fetcher = self.next_fetcher();
        fetcher.fetch(path).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Records which mirror served each call, in global call order.
    struct Mirror {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for Mirror {
        async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
            self.log.lock().unwrap().push(self.id);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path == "missing" {
                return Err(FetchError::NotFound {
                    path: path.to_string(),
                });
            }
            Ok(Bytes::from(format!("mirror {} {path}", self.id)))
        }
    }

    fn mirrors(count: usize) -> (Vec<Arc<Mirror>>, Arc<Mutex<Vec<usize>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mirrors = (0..count)
            .map(|id| {
                Arc::new(Mirror {
                    id,
                    log: Arc::clone(&log),
                    calls: AtomicUsize::new(0),
                })
            })
            .collect();
        (mirrors, log)
    }

    fn round_robin(mirrors: &[Arc<Mirror>]) -> RoundRobinFetcher {
        let fetchers = mirrors
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn Fetcher>)
            .collect();
        RoundRobinFetcher::new(fetchers).unwrap()
    }

    #[test]
    fn test_empty_list_rejected() {
        assert!(RoundRobinFetcher::new(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_sequential_calls_rotate() {
        let (mirrors, log) = mirrors(3);
        let rr = round_robin(&mirrors);
        assert_eq!(rr.len(), 3);

        for _ in 0..7 {
            rr.fetch("checkpoint").await.unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn test_results_pass_through() {
        let (mirrors, _log) = mirrors(2);
        let rr = round_robin(&mirrors);

        assert_eq!(rr.fetch("a").await.unwrap(), Bytes::from("mirror 0 a"));
        assert_eq!(rr.fetch("b").await.unwrap(), Bytes::from("mirror 1 b"));
        assert!(rr.fetch("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_stay_balanced() {
        let (mirrors, _log) = mirrors(3);
        let rr = Arc::new(round_robin(&mirrors));

        let handles: Vec<_> = (0..300)
            .map(|i| {
                let rr = Arc::clone(&rr);
                tokio::spawn(async move { rr.fetch(&format!("leaf/{i}")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for mirror in &mirrors {
            assert_eq!(mirror.calls.load(Ordering::SeqCst), 100);
        }
    }
}
