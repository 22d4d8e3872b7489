use thiserror::Error;

/// Application-wide error types for the crawler.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// HTTP request failed (fetching a channel page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The target site signalled rate limiting (429 or body marker).
    #[error("Rate limited by target site")]
    RateLimited,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Channel page HTML could not be processed at all.
    #[error("Parse error for {channel}: {message}")]
    ParseError { channel: String, message: String },

    /// Proxies are required but none are available.
    #[error("Proxy pool exhausted and proxies are required")]
    NoProxyAvailable,

    /// Writing or publishing cycle output failed. Cycle-fatal.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A streaming sink rejected a record. Never cycle-fatal.
    #[error("Sink error: {0}")]
    SinkError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl From<std::io::Error> for CrawlError {
    fn from(e: std::io::Error) -> Self {
        CrawlError::PersistenceError(e.to_string())
    }
}

impl CrawlError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrawlError::NetworkError(_) | CrawlError::Timeout(_) | CrawlError::RateLimited => true,
            CrawlError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error counts as evidence of rate limiting
    /// for the pacing controller.
    pub fn is_throttle_signal(&self) -> bool {
        matches!(self, CrawlError::RateLimited)
    }

    /// Returns true if this error must abort the whole cycle rather than
    /// just the channel it occurred on.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::PersistenceError(_) | CrawlError::SerializationError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(CrawlError::NetworkError("reset".into()).is_retryable());
        assert!(CrawlError::Timeout(30).is_retryable());
        assert!(CrawlError::RateLimited.is_retryable());
        assert!(!CrawlError::PersistenceError("disk full".into()).is_retryable());
        assert!(
            !CrawlError::ParseError {
                channel: "a".into(),
                message: "bad html".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_cycle_fatal_classification() {
        assert!(CrawlError::PersistenceError("rename failed".into()).is_cycle_fatal());
        assert!(!CrawlError::SinkError("broker down".into()).is_cycle_fatal());
        assert!(!CrawlError::RateLimited.is_cycle_fatal());
    }
}
