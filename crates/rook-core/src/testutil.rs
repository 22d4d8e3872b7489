//! Hand-rolled test doubles for the engine's seams.
//!
//! Compiled into unit tests here and reused by downstream crates' tests
//! through the `testutil` feature-less re-export. All mocks are
//! `Arc<Mutex<_>>`-backed so cloned handles observe the same state, the
//! same way the real implementations share state across workers.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::CrawlError;
use crate::outcome::FetchOutcome;
use crate::record::{
    ChannelBio, CommitResult, CrawlCycleResult, MessageRecord, Record,
};
use crate::traits::{
    ChannelSource, CycleStore, PageFetcher, PageParser, ProxySource, RecordSink,
};

// --- builders ---

pub fn sample_message(channel: &str, id: u64) -> MessageRecord {
    MessageRecord {
        id,
        channel_id: channel.to_string(),
        url: format!("https://eitaa.com/{channel}/{id}"),
        text: format!("message {id}"),
        view_count: "1.2k".to_string(),
        posted_time: Utc::now(),
        crawled_at: Utc::now(),
        extraction_errors: vec![],
    }
}

pub fn sample_bio(channel: &str) -> ChannelBio {
    ChannelBio {
        channel_id: channel.to_string(),
        title: format!("Channel {channel}"),
        username: format!("@{channel}"),
        follower_count: "10k".to_string(),
        image_count: "120".to_string(),
        video_count: "34".to_string(),
        file_count: "5".to_string(),
        description: "a test channel".to_string(),
        crawled_at: Utc::now(),
        extraction_errors: vec![],
    }
}

/// One bio plus `message_count` messages for a single channel.
pub fn sample_cycle(channel: &str, message_count: u64) -> CrawlCycleResult {
    CrawlCycleResult {
        messages: (1..=message_count)
            .map(|id| sample_message(channel, id))
            .collect(),
        bios: vec![sample_bio(channel)],
        skipped: vec![],
        started_at: Some(Utc::now()),
        finished_at: Some(Utc::now()),
    }
}

/// Minimal but structurally real channel page HTML for parser tests.
pub fn sample_page_html(channel: &str, message_ids: &[u64]) -> String {
    let mut html = String::from(
        "<html><body><div class=\"etme_channel_info\">\
         <div class=\"etme_channel_info_header_title\"><span dir=\"auto\">Test Channel</span></div>\
         <div class=\"etme_channel_info_header_username\">",
    );
    html.push_str(&format!("<a href=\"https://eitaa.com/{channel}\">@{channel}</a></div>"));
    html.push_str(
        "<div class=\"etme_channel_info_description\">desc</div>\
         <div class=\"etme_channel_info_counters\">\
         <div class=\"etme_channel_info_counter\"><span class=\"counter_value\">10.5هزار</span>\
         <span class=\"counter_type\">دنبال‌کننده</span></div>\
         </div></div>",
    );
    for id in message_ids {
        html.push_str(&format!(
            "<div class=\"etme_widget_message_wrap js-widget_message_wrap\">\
             <div class=\"etme_widget_message\" data-post=\"{channel}/{id}\">\
             <div class=\"etme_widget_message_text js-message_text\">text {id}</div>\
             <span class=\"etme_widget_message_views\">3.4k</span>\
             <time class=\"time\" datetime=\"2026-08-27T10:15:00+00:00\">10:15</time>\
             </div></div>"
        ));
    }
    html.push_str("</body></html>");
    html
}

// --- fetcher ---

/// Queued per-channel outcomes; pops one per fetch, falling back to 404
/// when a channel's queue runs dry. Records every (channel, proxy) call.
#[derive(Clone, Default)]
pub struct MockFetcher {
    outcomes: Arc<Mutex<HashMap<String, VecDeque<FetchOutcome>>>>,
    calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, channel: &str, outcome: FetchOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Convenience: queue a 200 with structurally real page HTML.
    pub fn queue_page(&self, channel: &str, message_ids: &[u64]) {
        self.queue(
            channel,
            FetchOutcome::Success {
                body: sample_page_html(channel, message_ids),
                status: 200,
            },
        );
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageFetcher for MockFetcher {
    async fn fetch(&self, channel_id: &str, proxy: Option<&str>) -> FetchOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((channel_id.to_string(), proxy.map(str::to_string)));
        self.outcomes
            .lock()
            .unwrap()
            .get_mut(channel_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(FetchOutcome::NotFound)
    }
}

// --- parser ---

/// Fabricates one bio and `messages_per_page` messages per call without
/// looking at the HTML.
#[derive(Clone)]
pub struct StubParser {
    pub messages_per_page: u64,
}

impl PageParser for StubParser {
    fn parse_channel_page(&self, _html: &str, channel_id: &str) -> (ChannelBio, Vec<MessageRecord>) {
        let messages = (1..=self.messages_per_page)
            .map(|id| sample_message(channel_id, id))
            .collect();
        (sample_bio(channel_id), messages)
    }
}

// --- proxy source ---

#[derive(Clone, Default)]
pub struct MockProxySource {
    addresses: Arc<Mutex<Vec<String>>>,
    fetch_count: Arc<Mutex<usize>>,
}

impl MockProxySource {
    pub fn with_addresses(addresses: &[&str]) -> Self {
        Self {
            addresses: Arc::new(Mutex::new(
                addresses.iter().map(|s| s.to_string()).collect(),
            )),
            fetch_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }
}

impl ProxySource for MockProxySource {
    async fn fetch_proxies(&self) -> Result<Vec<String>, CrawlError> {
        *self.fetch_count.lock().unwrap() += 1;
        Ok(self.addresses.lock().unwrap().clone())
    }
}

// --- channel source ---

#[derive(Clone, Default)]
pub struct MockChannelSource {
    channels: Arc<Mutex<Vec<String>>>,
}

impl MockChannelSource {
    pub fn with_channels(channels: &[&str]) -> Self {
        Self {
            channels: Arc::new(Mutex::new(
                channels.iter().map(|s| s.to_string()).collect(),
            )),
        }
    }

    pub fn set_channels(&self, channels: &[&str]) {
        *self.channels.lock().unwrap() = channels.iter().map(|s| s.to_string()).collect();
    }
}

impl ChannelSource for MockChannelSource {
    fn load(&self) -> Result<Vec<String>, CrawlError> {
        Ok(self.channels.lock().unwrap().clone())
    }
}

// --- sink ---

#[derive(Clone, Default)]
pub struct MockSink {
    published: Arc<Mutex<Vec<Record>>>,
    attempts: Arc<Mutex<usize>>,
    fail: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every publish fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<Record> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_keys(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(Record::sink_key)
            .collect()
    }

    pub fn publish_attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

impl RecordSink for MockSink {
    async fn publish(&self, record: &Record) -> Result<(), CrawlError> {
        *self.attempts.lock().unwrap() += 1;
        if self.fail {
            return Err(CrawlError::SinkError("mock sink down".to_string()));
        }
        self.published.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// --- store ---

#[derive(Clone, Default)]
pub struct MockStore {
    merged: Arc<Mutex<Vec<CrawlCycleResult>>>,
    fail: bool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose merge always fails with a persistence error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn merged(&self) -> Vec<CrawlCycleResult> {
        self.merged.lock().unwrap().clone()
    }
}

impl CycleStore for MockStore {
    fn merge(&self, cycle: &CrawlCycleResult) -> Result<CommitResult, CrawlError> {
        if self.fail {
            return Err(CrawlError::PersistenceError("mock disk full".to_string()));
        }
        self.merged.lock().unwrap().push(cycle.clone());
        Ok(CommitResult {
            files_written: 1,
            cycles_pruned: 0,
            messages_merged: cycle.messages.len(),
            bios_written: cycle.bios.len(),
        })
    }
}
