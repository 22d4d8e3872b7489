pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod pacing;
pub mod proxy;
pub mod record;
pub mod testutil;
pub mod traits;

pub use config::{EngineConfig, MIN_CRAWL_INTERVAL};
pub use dispatch::{DispatchStats, SinkDispatcher};
pub use engine::{CrawlEngine, CycleReport, EngineReporter, TracingEngineReporter};
pub use error::CrawlError;
pub use outcome::{FetchOutcome, ThrottleSignal};
pub use pacing::{PacingConfig, PacingController, PacingState};
pub use proxy::ProxyPool;
pub use record::{
    ChannelBio, CommitResult, CrawlCycleResult, MessageRecord, Record, SkipReason,
};
pub use traits::{
    ChannelSource, CycleStore, NullProxySource, NullSink, PageFetcher, PageParser, ProxySource,
    RecordSink,
};
