use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message harvested from a channel page.
///
/// Identity is `(channel_id, id)`. Records are append-only facts: a
/// re-crawl of the same message only refreshes `crawled_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: u64,
    pub channel_id: String,
    pub url: String,
    pub text: String,
    /// View count as seen on the page (may be abbreviated, e.g. "1.2k").
    pub view_count: String,
    pub posted_time: DateTime<Utc>,
    pub crawled_at: DateTime<Utc>,
    /// Fields whose extraction strategies were all exhausted, as
    /// "field: reason" entries. Empty when every field resolved cleanly.
    pub extraction_errors: Vec<String>,
}

/// Channel metadata extracted from the page header.
///
/// One live instance per channel, overwritten each cycle. Counter fields
/// keep the source's abbreviated format as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBio {
    pub channel_id: String,
    pub title: String,
    pub username: String,
    pub follower_count: String,
    pub image_count: String,
    pub video_count: String,
    pub file_count: String,
    pub description: String,
    pub crawled_at: DateTime<Utc>,
    pub extraction_errors: Vec<String>,
}

/// Wire-stable record shape delivered to sinks.
///
/// The `kind` tag discriminates messages from channel bios.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Record {
    #[serde(rename = "message")]
    Message(MessageRecord),
    #[serde(rename = "channel")]
    Channel(ChannelBio),
}

impl Record {
    /// Sink key: `{channel_id}_{id}` for messages, the channel id for bios.
    pub fn sink_key(&self) -> String {
        match self {
            Record::Message(m) => format!("{}_{}", m.channel_id, m.id),
            Record::Channel(b) => b.channel_id.clone(),
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            Record::Message(m) => &m.channel_id,
            Record::Channel(b) => &b.channel_id,
        }
    }
}

/// Why a channel produced no data this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    Forbidden,
    RateLimited,
    Transient(String),
    Fatal(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotFound => write!(f, "not found"),
            SkipReason::Forbidden => write!(f, "forbidden"),
            SkipReason::RateLimited => write!(f, "rate limited"),
            SkipReason::Transient(cause) => write!(f, "transient: {cause}"),
            SkipReason::Fatal(cause) => write!(f, "fatal: {cause}"),
        }
    }
}

/// Everything one pass over the channel list produced.
///
/// The unit of accumulation and sink dispatch: the engine merges exactly
/// one of these per cycle, after all workers have finished.
#[derive(Debug, Clone, Default)]
pub struct CrawlCycleResult {
    pub messages: Vec<MessageRecord>,
    pub bios: Vec<ChannelBio>,
    /// Channels that yielded nothing this cycle, with the reason.
    pub skipped: Vec<(String, SkipReason)>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CrawlCycleResult {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.bios.is_empty()
    }

    /// All records of this cycle in dispatch order: bios first, then
    /// messages.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.bios
            .iter()
            .cloned()
            .map(Record::Channel)
            .chain(self.messages.iter().cloned().map(Record::Message))
    }
}

/// What a history merge actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitResult {
    pub files_written: usize,
    pub cycles_pruned: usize,
    pub messages_merged: usize,
    pub bios_written: usize,
}
