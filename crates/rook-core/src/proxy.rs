//! Rotating proxy pool.
//!
//! Hands out one egress proxy per fetch attempt, round-robin among live
//! entries. Proxies accumulate consecutive failures on release and are
//! evicted past a threshold; a timed refresh replaces the pool wholesale.
//! Refresh bumps an epoch so a proxy already handed out simply completes
//! its current use with the old record — releases from stale epochs are
//! ignored.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One proxy's bookkeeping. Owned exclusively by the pool.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub address: String,
    pub consecutive_failures: u32,
    pub last_used_at: Option<Instant>,
}

#[derive(Debug)]
struct ProxyPoolInner {
    proxies: Vec<ProxyRecord>,
    cursor: usize,
    epoch: u64,
    last_refresh: Option<Instant>,
}

/// Thread-safe rotating pool of egress proxies.
#[derive(Clone)]
pub struct ProxyPool {
    failure_threshold: u32,
    refresh_interval: Duration,
    inner: Arc<Mutex<ProxyPoolInner>>,
}

impl ProxyPool {
    pub fn new(failure_threshold: u32, refresh_interval: Duration) -> Self {
        Self {
            failure_threshold,
            refresh_interval,
            inner: Arc::new(Mutex::new(ProxyPoolInner {
                proxies: Vec::new(),
                cursor: 0,
                epoch: 0,
                last_refresh: None,
            })),
        }
    }

    /// Acquires the inner mutex, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, ProxyPoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy pool mutex");
            poisoned.into_inner()
        })
    }

    /// Next live proxy, round-robin, or `None` when the pool is empty.
    pub fn acquire(&self) -> Option<String> {
        let mut inner = self.lock_inner();
        if inner.proxies.is_empty() {
            return None;
        }
        let idx = inner.cursor % inner.proxies.len();
        inner.cursor = inner.cursor.wrapping_add(1);
        inner.proxies[idx].last_used_at = Some(Instant::now());
        Some(inner.proxies[idx].address.clone())
    }

    /// Report how a handed-out proxy performed. Success resets its failure
    /// counter; failure increments it and evicts past the threshold.
    /// Addresses no longer in the pool (evicted, or from a pre-refresh
    /// epoch) are ignored.
    pub fn release(&self, address: &str, success: bool) {
        let mut inner = self.lock_inner();
        let Some(pos) = inner.proxies.iter().position(|p| p.address == address) else {
            return;
        };

        if success {
            inner.proxies[pos].consecutive_failures = 0;
            return;
        }

        inner.proxies[pos].consecutive_failures += 1;
        if inner.proxies[pos].consecutive_failures >= self.failure_threshold {
            let evicted = inner.proxies.remove(pos);
            tracing::info!(
                proxy = %evicted.address,
                failures = evicted.consecutive_failures,
                remaining = inner.proxies.len(),
                "Evicted proxy after repeated failures"
            );
        }
    }

    /// Replace the pool contents. Safe to call while proxies are handed
    /// out: in-flight uses finish against the old records.
    pub fn refresh(&self, addresses: Vec<String>) {
        let mut inner = self.lock_inner();
        inner.epoch += 1;
        inner.cursor = 0;
        inner.last_refresh = Some(Instant::now());

        let mut proxies: Vec<ProxyRecord> = Vec::with_capacity(addresses.len());
        for address in addresses {
            if proxies.iter().any(|p: &ProxyRecord| p.address == address) {
                continue;
            }
            proxies.push(ProxyRecord {
                address,
                consecutive_failures: 0,
                last_used_at: None,
            });
        }
        tracing::info!(
            epoch = inner.epoch,
            size = proxies.len(),
            "Proxy pool refreshed"
        );
        inner.proxies = proxies;
    }

    /// True when the refresh timer has elapsed (or the pool has never
    /// been populated).
    pub fn needs_refresh(&self) -> bool {
        let inner = self.lock_inner();
        match inner.last_refresh {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.lock_inner().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(addresses: &[&str]) -> ProxyPool {
        let pool = ProxyPool::new(3, Duration::from_secs(3600));
        pool.refresh(addresses.iter().map(|s| s.to_string()).collect());
        pool
    }

    #[test]
    fn test_acquire_rotates_round_robin() {
        let pool = pool_with(&["http://1.1.1.1:80", "http://2.2.2.2:80"]);
        assert_eq!(pool.acquire().as_deref(), Some("http://1.1.1.1:80"));
        assert_eq!(pool.acquire().as_deref(), Some("http://2.2.2.2:80"));
        assert_eq!(pool.acquire().as_deref(), Some("http://1.1.1.1:80"));
    }

    #[test]
    fn test_empty_pool_acquires_none() {
        let pool = ProxyPool::new(3, Duration::from_secs(3600));
        assert_eq!(pool.acquire(), None);
    }

    #[test]
    fn test_eviction_after_failure_threshold() {
        let pool = pool_with(&["http://1.1.1.1:80", "http://2.2.2.2:80"]);
        for _ in 0..3 {
            pool.release("http://1.1.1.1:80", false);
        }
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.acquire().as_deref(), Some("http://2.2.2.2:80"));
        assert_eq!(pool.acquire().as_deref(), Some("http://2.2.2.2:80"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let pool = pool_with(&["http://1.1.1.1:80"]);
        pool.release("http://1.1.1.1:80", false);
        pool.release("http://1.1.1.1:80", false);
        pool.release("http://1.1.1.1:80", true);
        pool.release("http://1.1.1.1:80", false);
        pool.release("http://1.1.1.1:80", false);
        assert_eq!(pool.len(), 1, "reset counter should survive two more failures");
    }

    #[test]
    fn test_release_after_refresh_is_ignored() {
        let pool = pool_with(&["http://1.1.1.1:80"]);
        let handed_out = pool.acquire().unwrap();
        pool.refresh(vec!["http://9.9.9.9:80".to_string()]);

        // The old proxy finished its in-flight use; releasing it must not
        // disturb the new epoch's contents.
        pool.release(&handed_out, false);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.acquire().as_deref(), Some("http://9.9.9.9:80"));
    }

    #[test]
    fn test_refresh_deduplicates() {
        let pool = ProxyPool::new(3, Duration::from_secs(3600));
        pool.refresh(vec![
            "http://1.1.1.1:80".to_string(),
            "http://1.1.1.1:80".to_string(),
        ]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_needs_refresh_on_timer() {
        let pool = ProxyPool::new(3, Duration::from_millis(10));
        assert!(pool.needs_refresh(), "never-populated pool needs refresh");
        pool.refresh(vec!["http://1.1.1.1:80".to_string()]);
        assert!(!pool.needs_refresh());
        std::thread::sleep(Duration::from_millis(20));
        assert!(pool.needs_refresh());
    }
}
