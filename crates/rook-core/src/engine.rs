//! The crawl engine: periodic cycles over a channel list.
//!
//! One cycle = reload channels, fetch+parse each through the proxy pool
//! under pacing control, then a single post-barrier merge into the on-disk
//! history followed by best-effort sink dispatch. The inter-cycle interval
//! is measured end-to-start: the pause begins only after the merge and
//! dispatch of the previous cycle have finished.

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dispatch::{DispatchStats, SinkDispatcher};
use crate::error::CrawlError;
use crate::outcome::FetchOutcome;
use crate::pacing::PacingController;
use crate::proxy::ProxyPool;
use crate::record::{ChannelBio, CommitResult, CrawlCycleResult, MessageRecord, SkipReason};
use crate::traits::{
    ChannelSource, CycleStore, PageFetcher, PageParser, ProxySource, RecordSink,
};

/// Events emitted by the engine for monitoring/logging.
#[derive(Debug, Clone)]
pub enum EngineEvent<'a> {
    Started,
    CycleStarted {
        channels: usize,
    },
    ChannelCompleted {
        channel: &'a str,
        messages: usize,
    },
    ChannelSkipped {
        channel: &'a str,
        reason: &'a SkipReason,
    },
    CycleCommitted {
        commit: &'a CommitResult,
        dispatch: &'a DispatchStats,
    },
    CycleFailed {
        error: &'a str,
    },
    Stopped,
}

/// Trait for receiving engine events (decoupled logging).
pub trait EngineReporter: Send + Sync {
    fn report(&self, event: EngineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEngineReporter;

impl EngineReporter for TracingEngineReporter {
    fn report(&self, event: EngineEvent<'_>) {
        match event {
            EngineEvent::Started => {
                tracing::info!("Crawl engine started");
            }
            EngineEvent::CycleStarted { channels } => {
                tracing::info!(%channels, "Cycle started");
            }
            EngineEvent::ChannelCompleted { channel, messages } => {
                tracing::debug!(%channel, %messages, "Channel crawled");
            }
            EngineEvent::ChannelSkipped { channel, reason } => {
                tracing::warn!(%channel, %reason, "Channel skipped");
            }
            EngineEvent::CycleCommitted { commit, dispatch } => {
                tracing::info!(
                    files = commit.files_written,
                    messages = commit.messages_merged,
                    bios = commit.bios_written,
                    pruned = commit.cycles_pruned,
                    published = dispatch.published,
                    dropped = dispatch.dropped,
                    "Cycle committed"
                );
            }
            EngineEvent::CycleFailed { error } => {
                tracing::error!(%error, "Cycle failed");
            }
            EngineEvent::Stopped => {
                tracing::info!("Crawl engine stopped");
            }
        }
    }
}

/// Per-channel result inside a cycle, joined after the worker barrier.
enum ChannelOutcome {
    Data(ChannelBio, Vec<MessageRecord>),
    Skipped(SkipReason),
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub crawled: usize,
    pub skipped: usize,
    pub commit: CommitResult,
    pub dispatch: DispatchStats,
}

/// Orchestrates periodic crawl cycles.
pub struct CrawlEngine<F, P, X, K, St, C>
where
    F: PageFetcher + 'static,
    P: PageParser + 'static,
    X: ProxySource,
    K: RecordSink,
    St: CycleStore,
    C: ChannelSource,
{
    fetcher: F,
    parser: P,
    proxy_source: X,
    dispatcher: SinkDispatcher<K>,
    store: St,
    channels: C,
    proxy_pool: ProxyPool,
    pacing: PacingController,
    config: EngineConfig,
}

impl<F, P, X, K, St, C> CrawlEngine<F, P, X, K, St, C>
where
    F: PageFetcher + 'static,
    P: PageParser + 'static,
    X: ProxySource,
    K: RecordSink,
    St: CycleStore,
    C: ChannelSource,
{
    pub fn new(
        config: EngineConfig,
        fetcher: F,
        parser: P,
        proxy_source: X,
        sink: K,
        store: St,
        channels: C,
    ) -> Self {
        let proxy_pool = ProxyPool::new(
            config.proxy_failure_threshold,
            config.proxy_refresh_interval,
        );
        let pacing = PacingController::new(config.pacing.clone());
        let dispatcher = SinkDispatcher::new(sink, config.sink_retry_attempts);
        Self {
            fetcher,
            parser,
            proxy_source,
            dispatcher,
            store,
            channels,
            proxy_pool,
            pacing,
            config,
        }
    }

    pub fn proxy_pool(&self) -> &ProxyPool {
        &self.proxy_pool
    }

    pub fn pacing(&self) -> &PacingController {
        &self.pacing
    }

    /// Run cycles until cancellation. A failed cycle (including a failed
    /// merge) is logged and the engine moves on to the next interval; only
    /// cancellation ends the loop.
    pub async fn run<R: EngineReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> Result<(), CrawlError> {
        reporter.report(EngineEvent::Started);

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            if let Err(e) = self.run_once(reporter).await {
                reporter.report(EngineEvent::CycleFailed {
                    error: &e.to_string(),
                });
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }

        reporter.report(EngineEvent::Stopped);
        Ok(())
    }

    /// Run exactly one cycle now: refresh proxies if due, crawl every
    /// channel, merge the result and dispatch it.
    pub async fn run_once<R: EngineReporter>(
        &self,
        reporter: &R,
    ) -> Result<CycleReport, CrawlError> {
        self.refresh_proxies_if_due().await;

        let channels = self.channels.load()?;
        reporter.report(EngineEvent::CycleStarted {
            channels: channels.len(),
        });

        let cycle = self.crawl_channels(&channels, reporter).await;

        // Single post-barrier merge: the history sees one atomic commit
        // per cycle, never partial worker output.
        let commit = self.store.merge(&cycle)?;

        let dispatch = if self.config.streaming_enabled {
            self.dispatcher.dispatch_cycle(&cycle).await
        } else {
            DispatchStats::default()
        };

        reporter.report(EngineEvent::CycleCommitted {
            commit: &commit,
            dispatch: &dispatch,
        });

        Ok(CycleReport {
            crawled: cycle.bios.len(),
            skipped: cycle.skipped.len(),
            commit,
            dispatch,
        })
    }

    async fn refresh_proxies_if_due(&self) {
        if !self.proxy_pool.needs_refresh() {
            return;
        }
        match self.proxy_source.fetch_proxies().await {
            Ok(addresses) if addresses.is_empty() => {
                tracing::debug!("Proxy source returned no addresses");
            }
            Ok(addresses) => self.proxy_pool.refresh(addresses),
            Err(e) => {
                // The pool keeps serving its current (possibly stale)
                // entries until the next refresh attempt.
                tracing::warn!(error = %e, "Proxy refresh failed");
            }
        }
    }

    /// Fetch and parse every channel, in batches sized by the pacing
    /// controller, with at most `concurrency` in-flight fetches.
    async fn crawl_channels<R: EngineReporter>(
        &self,
        channels: &[String],
        reporter: &R,
    ) -> CrawlCycleResult {
        let mut cycle = CrawlCycleResult {
            started_at: Some(Utc::now()),
            ..CrawlCycleResult::default()
        };

        let mut remaining = channels;
        while !remaining.is_empty() {
            // Re-read the batch size between batches so throttling that
            // sets in mid-cycle shrinks the rest of the cycle too.
            let batch_size = self.pacing.current_batch_size(self.config.batch_size);
            let (batch, rest) = remaining.split_at(batch_size.min(remaining.len()));
            remaining = rest;

            let mut set: JoinSet<(String, ChannelOutcome)> = JoinSet::new();

            for channel in batch {
                while set.len() >= self.config.concurrency {
                    if let Some(joined) = set.join_next().await {
                        self.collect(joined, &mut cycle, reporter);
                    }
                }

                let channel = channel.clone();
                let fetcher = self.fetcher.clone();
                let parser = self.parser.clone();
                let pool = self.proxy_pool.clone();
                let pacing = self.pacing.clone();
                let require_proxies = self.config.require_proxies;

                set.spawn(async move {
                    let outcome = crawl_one(
                        &channel,
                        &fetcher,
                        &parser,
                        &pool,
                        &pacing,
                        require_proxies,
                    )
                    .await;
                    (channel, outcome)
                });
            }

            while let Some(joined) = set.join_next().await {
                self.collect(joined, &mut cycle, reporter);
            }
        }

        cycle.finished_at = Some(Utc::now());
        cycle
    }

    fn collect<R: EngineReporter>(
        &self,
        joined: Result<(String, ChannelOutcome), tokio::task::JoinError>,
        cycle: &mut CrawlCycleResult,
        reporter: &R,
    ) {
        match joined {
            Ok((channel, ChannelOutcome::Data(bio, messages))) => {
                reporter.report(EngineEvent::ChannelCompleted {
                    channel: &channel,
                    messages: messages.len(),
                });
                cycle.bios.push(bio);
                cycle.messages.extend(messages);
            }
            Ok((channel, ChannelOutcome::Skipped(reason))) => {
                reporter.report(EngineEvent::ChannelSkipped {
                    channel: &channel,
                    reason: &reason,
                });
                cycle.skipped.push((channel, reason));
            }
            Err(e) => {
                tracing::error!(error = %e, "Channel worker panicked");
            }
        }
    }
}

/// One channel's fetch+parse, including proxy bookkeeping and pacing
/// observation.
async fn crawl_one<F: PageFetcher, P: PageParser>(
    channel: &str,
    fetcher: &F,
    parser: &P,
    pool: &ProxyPool,
    pacing: &PacingController,
    require_proxies: bool,
) -> ChannelOutcome {
    tokio::time::sleep(pacing.current_delay()).await;

    let proxy = pool.acquire();
    if require_proxies && proxy.is_none() {
        // Fail fast rather than leak the crawler's own address.
        return ChannelOutcome::Skipped(SkipReason::Fatal(
            CrawlError::NoProxyAvailable.to_string(),
        ));
    }

    let outcome = fetcher.fetch(channel, proxy.as_deref()).await;

    if let Some(address) = proxy.as_deref() {
        // A 403 or exhausted transient retries counts against the proxy;
        // rate limiting is the site's doing, not the proxy's.
        let proxy_ok = !matches!(
            outcome,
            FetchOutcome::Forbidden | FetchOutcome::Transient { .. }
        );
        pool.release(address, proxy_ok);
    }

    if let Some(signal) = outcome.throttle_signal() {
        pacing.observe(signal);
    }

    match outcome {
        FetchOutcome::Success { body, .. } => {
            let (bio, messages) = parser.parse_channel_page(&body, channel);
            ChannelOutcome::Data(bio, messages)
        }
        FetchOutcome::RateLimited { .. } => ChannelOutcome::Skipped(SkipReason::RateLimited),
        FetchOutcome::NotFound => ChannelOutcome::Skipped(SkipReason::NotFound),
        FetchOutcome::Forbidden => ChannelOutcome::Skipped(SkipReason::Forbidden),
        FetchOutcome::Transient { cause } => {
            ChannelOutcome::Skipped(SkipReason::Transient(cause))
        }
        FetchOutcome::Fatal { cause } => ChannelOutcome::Skipped(SkipReason::Fatal(cause)),
    }
}
