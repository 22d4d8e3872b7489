use std::future::Future;

use crate::error::CrawlError;
use crate::outcome::FetchOutcome;
use crate::record::{ChannelBio, CommitResult, CrawlCycleResult, MessageRecord, Record};

/// Fetches one channel page, optionally through a proxy address.
///
/// Never returns an error: every failure mode is a classified
/// [`FetchOutcome`] variant.
pub trait PageFetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        channel_id: &str,
        proxy: Option<&str>,
    ) -> impl Future<Output = FetchOutcome> + Send;
}

/// Extracts a channel bio and message records from page HTML.
///
/// Partial-success contract: parsing never fails outright — fields whose
/// strategies are exhausted come back defaulted, with the miss recorded in
/// the record's `extraction_errors`.
pub trait PageParser: Send + Sync + Clone {
    fn parse_channel_page(
        &self,
        html: &str,
        channel_id: &str,
    ) -> (ChannelBio, Vec<MessageRecord>);
}

/// Supplies proxy candidate addresses for the pool.
pub trait ProxySource: Send + Sync + Clone {
    fn fetch_proxies(&self) -> impl Future<Output = Result<Vec<String>, CrawlError>> + Send;
}

/// Supplies the channel list, reloaded at the start of every cycle.
pub trait ChannelSource: Send + Sync + Clone {
    fn load(&self) -> Result<Vec<String>, CrawlError>;
}

/// Delivers one validated record to a streaming destination.
pub trait RecordSink: Send + Sync + Clone {
    fn publish(&self, record: &Record) -> impl Future<Output = Result<(), CrawlError>> + Send;
}

/// Persists a cycle's records into the retained on-disk history.
pub trait CycleStore: Send + Sync + Clone {
    fn merge(&self, cycle: &CrawlCycleResult) -> Result<CommitResult, CrawlError>;
}

/// A no-op sink for when streaming is disabled.
#[derive(Debug, Clone)]
pub struct NullSink;

impl RecordSink for NullSink {
    async fn publish(&self, _record: &Record) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// A proxy source that supplies nothing, for proxy-less deployments.
#[derive(Debug, Clone)]
pub struct NullProxySource;

impl ProxySource for NullProxySource {
    async fn fetch_proxies(&self) -> Result<Vec<String>, CrawlError> {
        Ok(vec![])
    }
}
