//! Record delivery to streaming sinks.
//!
//! Dispatch is strictly best-effort: the on-disk history is the durable
//! copy, so a sink that keeps failing costs the stream those records but
//! never fails the cycle. Each record gets a bounded number of delivery
//! attempts before it is dropped with a log line.

use std::time::Duration;

use crate::record::CrawlCycleResult;
use crate::traits::RecordSink;

/// Pause between delivery attempts for one record.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// What one cycle's dispatch accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub published: usize,
    pub dropped: usize,
}

/// Pushes a cycle's records into a [`RecordSink`], bios first.
#[derive(Clone)]
pub struct SinkDispatcher<S: RecordSink> {
    sink: S,
    max_attempts: u32,
}

impl<S: RecordSink> SinkDispatcher<S> {
    pub fn new(sink: S, max_attempts: u32) -> Self {
        Self {
            sink,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Deliver every record of the cycle. Never returns an error: delivery
    /// failures are counted, logged and swallowed.
    pub async fn dispatch_cycle(&self, cycle: &CrawlCycleResult) -> DispatchStats {
        let mut stats = DispatchStats::default();

        for record in cycle.records() {
            let key = record.sink_key();
            let mut delivered = false;

            for attempt in 1..=self.max_attempts {
                match self.sink.publish(&record).await {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(e) if attempt < self.max_attempts => {
                        tracing::debug!(
                            key = %key,
                            attempt,
                            error = %e,
                            "Sink publish failed, retrying"
                        );
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            key = %key,
                            attempts = self.max_attempts,
                            error = %e,
                            "Dropping record after exhausted sink retries"
                        );
                    }
                }
            }

            if delivered {
                stats.published += 1;
            } else {
                stats.dropped += 1;
            }
        }

        if stats.dropped > 0 {
            tracing::warn!(
                published = stats.published,
                dropped = stats.dropped,
                "Cycle dispatched with losses"
            );
        } else {
            tracing::debug!(published = stats.published, "Cycle dispatched");
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_cycle, MockSink};
    use crate::traits::NullSink;

    #[tokio::test]
    async fn test_dispatch_publishes_bios_before_messages() {
        let sink = MockSink::new();
        let dispatcher = SinkDispatcher::new(sink.clone(), 3);

        let cycle = sample_cycle("news", 2);
        let stats = dispatcher.dispatch_cycle(&cycle).await;

        assert_eq!(stats.published, 3);
        assert_eq!(stats.dropped, 0);
        let keys = sink.published_keys();
        assert_eq!(keys[0], "news");
        assert_eq!(keys[1], "news_1");
        assert_eq!(keys[2], "news_2");
    }

    #[tokio::test]
    async fn test_failing_sink_drops_without_error() {
        let sink = MockSink::failing();
        let dispatcher = SinkDispatcher::new(sink.clone(), 2);

        let cycle = sample_cycle("news", 1);
        let stats = dispatcher.dispatch_cycle(&cycle).await;

        assert_eq!(stats.published, 0);
        assert_eq!(stats.dropped, 2);
        // Two records, two attempts each.
        assert_eq!(sink.publish_attempts(), 4);
    }

    #[tokio::test]
    async fn test_empty_cycle_dispatches_nothing() {
        let dispatcher = SinkDispatcher::new(NullSink, 3);
        let stats = dispatcher.dispatch_cycle(&CrawlCycleResult::default()).await;
        assert_eq!(stats, DispatchStats::default());
    }
}
