use std::time::Duration;

/// Classified result of one fetch attempt against a channel page.
///
/// Produced by the fetcher, consumed by the pacing controller (for
/// throttle decisions) and the parser (for `Success` bodies). Retry of
/// transient failures happens inside the fetcher; a `RateLimited` outcome
/// is never retried locally — that decision belongs to the controller.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// 2xx with a body worth parsing.
    Success { body: String, status: u16 },

    /// 429 or a recognized rate-limit marker in the response body.
    RateLimited { retry_after: Option<Duration> },

    /// 404 — channel skipped this cycle, non-fatal.
    NotFound,

    /// 403 — skipped, and the proxy used is marked failed.
    Forbidden,

    /// Network-level failure or 5xx after the retry budget ran out.
    Transient { cause: String },

    /// Unexpected terminal condition (e.g. proxies required but none
    /// available, or an unclassifiable status with no retries left).
    Fatal { cause: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    /// The pacing signal this outcome feeds into the controller, if any.
    pub fn throttle_signal(&self) -> Option<ThrottleSignal> {
        match self {
            FetchOutcome::Success { .. } => Some(ThrottleSignal::Success),
            FetchOutcome::RateLimited { retry_after } => Some(ThrottleSignal::RateLimited {
                retry_after: *retry_after,
            }),
            FetchOutcome::Forbidden => Some(ThrottleSignal::Negative),
            FetchOutcome::Transient { .. } => Some(ThrottleSignal::Negative),
            // NotFound says nothing about rate limiting; Fatal (local
            // config problem or unclassifiable status) is not pushback.
            FetchOutcome::NotFound | FetchOutcome::Fatal { .. } => None,
        }
    }
}

/// What an outcome tells the pacing controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleSignal {
    Success,
    /// Soft evidence: Transient or Forbidden. Throttles only past a
    /// sliding-window density threshold.
    Negative,
    /// Hard evidence: always throttles. Carries the server's Retry-After
    /// hint, which floors the throttled delay.
    RateLimited { retry_after: Option<Duration> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_mapping() {
        assert_eq!(
            FetchOutcome::Success {
                body: String::new(),
                status: 200
            }
            .throttle_signal(),
            Some(ThrottleSignal::Success)
        );
        assert_eq!(
            FetchOutcome::RateLimited { retry_after: None }.throttle_signal(),
            Some(ThrottleSignal::RateLimited { retry_after: None })
        );
        assert_eq!(
            FetchOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
            .throttle_signal(),
            Some(ThrottleSignal::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
        assert_eq!(
            FetchOutcome::Forbidden.throttle_signal(),
            Some(ThrottleSignal::Negative)
        );
        assert_eq!(FetchOutcome::NotFound.throttle_signal(), None);
        assert_eq!(
            FetchOutcome::Fatal {
                cause: "no proxy".into()
            }
            .throttle_signal(),
            None
        );
    }
}
