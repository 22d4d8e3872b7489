use std::path::PathBuf;
use std::time::Duration;

use crate::pacing::PacingConfig;

/// Minimum allowed crawl interval. Shorter intervals hammer the target
/// site and get the crawler rate limited almost immediately.
pub const MIN_CRAWL_INTERVAL: Duration = Duration::from_secs(60);

/// Immutable engine configuration, constructed once at startup and passed
/// by reference into each component. No component reads ambient state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,

    /// Retention of per-cycle output files:
    /// negative = keep everything, 0 = timestamped files only (no
    /// cumulative file), N > 0 = keep the last N cycles.
    pub retention: i32,

    /// Fail a fetch fast instead of going direct when the pool is empty.
    pub require_proxies: bool,

    /// How often the proxy pool is re-populated from its source.
    pub proxy_refresh_interval: Duration,

    /// Consecutive failures before a proxy is evicted from the pool.
    pub proxy_failure_threshold: u32,

    /// Worker pool width for per-channel fetch+parse. Kept low by default
    /// to avoid looking like a flood.
    pub concurrency: usize,

    /// Channels processed per batch before the engine re-reads pacing.
    pub batch_size: usize,

    /// Base URL of the target platform's web interface.
    pub base_url: String,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Attempt ceiling for one fetch (first try + retries).
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt up to `backoff_cap`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,

    /// Rate-limit state machine tuning.
    pub pacing: PacingConfig,

    /// Streaming bus settings. Records go to the bus only when enabled.
    pub streaming_enabled: bool,
    pub brokers: String,
    pub topic: String,

    /// Delivery attempts per record before the dispatcher drops it.
    pub sink_retry_attempts: u32,

    /// Root directory for cycle output files.
    pub output_root: PathBuf,

    /// JSON array of channel slugs, reloaded every cycle.
    pub channels_file: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            retention: 0,
            require_proxies: false,
            proxy_refresh_interval: Duration::from_secs(3600),
            proxy_failure_threshold: 3,
            concurrency: 2,
            batch_size: 10,
            base_url: "https://eitaa.com".to_string(),
            request_timeout: Duration::from_secs(15),
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(60),
            pacing: PacingConfig::default(),
            streaming_enabled: false,
            brokers: "localhost:9092".to_string(),
            topic: "channel-records".to_string(),
            sink_retry_attempts: 3,
            output_root: PathBuf::from("./output"),
            channels_file: PathBuf::from("./config/channels.json"),
        }
    }
}

impl EngineConfig {
    /// Set the inter-cycle interval, clamped to [`MIN_CRAWL_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_CRAWL_INTERVAL);
        self
    }

    pub fn with_retention(mut self, retention: i32) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_require_proxies(mut self, require: bool) -> Self {
        self.require_proxies = require;
        self
    }

    pub fn with_concurrency(mut self, width: usize) -> Self {
        self.concurrency = width.max(1);
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn with_channels_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.channels_file = path.into();
        self
    }

    pub fn with_streaming(mut self, brokers: impl Into<String>, topic: impl Into<String>) -> Self {
        self.streaming_enabled = true;
        self.brokers = brokers.into();
        self.topic = topic.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_floor_enforced() {
        let config = EngineConfig::default().with_interval(Duration::from_secs(5));
        assert_eq!(config.interval, MIN_CRAWL_INTERVAL);

        let config = EngineConfig::default().with_interval(Duration::from_secs(600));
        assert_eq!(config.interval, Duration::from_secs(600));
    }

    #[test]
    fn test_concurrency_never_zero() {
        let config = EngineConfig::default().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_default_is_conservative() {
        let config = EngineConfig::default();
        assert!(config.concurrency <= 4);
        assert!(!config.streaming_enabled);
        assert!(!config.require_proxies);
    }
}
