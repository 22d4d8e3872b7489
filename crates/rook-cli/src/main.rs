use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rook_client::{ChannelParser, HttpFetcher, HttpProxySource, KafkaSink};
use rook_core::engine::{CrawlEngine, TracingEngineReporter};
use rook_core::traits::{NullProxySource, NullSink, ProxySource, RecordSink};
use rook_core::EngineConfig;
use rook_store::{FileChannelSource, FileHistory};

#[derive(Parser)]
#[command(name = "rook", version, about = "Resilient crawl engine for public channel pages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl continuously at a fixed interval until interrupted
    Run {
        #[command(flatten)]
        opts: CrawlOpts,
    },

    /// Run a single crawl cycle and exit
    Once {
        #[command(flatten)]
        opts: CrawlOpts,
    },
}

#[derive(Args)]
struct CrawlOpts {
    /// Path to the JSON array of channel slugs, re-read every cycle
    #[arg(short, long, env = "ROOK_CHANNELS_FILE", default_value = "./config/channels.json")]
    channels: PathBuf,

    /// Root directory for crawl history output
    #[arg(short, long, env = "ROOK_OUTPUT_DIR", default_value = "./output")]
    output: PathBuf,

    /// Seconds between the end of one cycle and the start of the next
    /// (values below 60 are clamped up)
    #[arg(short, long, env = "ROOK_INTERVAL", default_value_t = 1800)]
    interval: u64,

    /// Per-cycle file retention: negative keeps everything, 0 keeps
    /// timestamped files only, N keeps the newest N cycles
    #[arg(
        short,
        long,
        env = "ROOK_RETENTION",
        default_value_t = 0,
        allow_hyphen_values = true
    )]
    retention: i32,

    /// Fail fetches fast instead of going direct when no proxy is available
    #[arg(long, env = "ROOK_REQUIRE_PROXIES", conflicts_with = "no_proxies")]
    require_proxies: bool,

    /// Crawl directly without any proxies
    #[arg(long, env = "ROOK_NO_PROXIES")]
    no_proxies: bool,

    /// Stream records to Kafka in addition to the on-disk history
    #[arg(long, env = "ROOK_USE_KAFKA")]
    kafka: bool,

    /// Kafka bootstrap servers
    #[arg(long, env = "ROOK_KAFKA_BROKERS", default_value = "localhost:9092")]
    brokers: String,

    /// Kafka topic for crawl records
    #[arg(long, env = "ROOK_KAFKA_TOPIC", default_value = "channel-records")]
    topic: String,

    /// Parallel channel fetches per cycle
    #[arg(long, env = "ROOK_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,
}

impl CrawlOpts {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_interval(Duration::from_secs(self.interval))
            .with_retention(self.retention)
            .with_require_proxies(self.require_proxies)
            .with_concurrency(self.concurrency)
            .with_output_root(&self.output)
            .with_channels_file(&self.channels);
        if self.kafka {
            config = config.with_streaming(&self.brokers, &self.topic);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rook=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (opts, once) = match cli.command {
        Commands::Run { opts } => (opts, false),
        Commands::Once { opts } => (opts, true),
    };
    let config = opts.engine_config();

    // The sink and proxy source vary by flags; the engine is generic over
    // both, so each combination gets its own concrete wiring.
    match (opts.no_proxies, opts.kafka) {
        (false, false) => {
            launch(config, HttpProxySource::new()?, NullSink, once).await
        }
        (false, true) => {
            let sink = KafkaSink::new(&opts.brokers, &opts.topic)
                .context("Failed to create Kafka producer")?;
            launch(config, HttpProxySource::new()?, sink, once).await
        }
        (true, false) => launch(config, NullProxySource, NullSink, once).await,
        (true, true) => {
            let sink = KafkaSink::new(&opts.brokers, &opts.topic)
                .context("Failed to create Kafka producer")?;
            launch(config, NullProxySource, sink, once).await
        }
    }
}

async fn launch<X, K>(config: EngineConfig, proxy_source: X, sink: K, once: bool) -> Result<()>
where
    X: ProxySource + 'static,
    K: RecordSink + 'static,
{
    let fetcher = HttpFetcher::new(&config).map_err(|e| anyhow::anyhow!(e))?;
    let store = FileHistory::new(&config.output_root, config.retention);
    let channels = FileChannelSource::new(&config.channels_file);

    let engine = CrawlEngine::new(
        config,
        fetcher,
        ChannelParser::new(),
        proxy_source,
        sink,
        store,
        channels,
    );
    let reporter = TracingEngineReporter;

    if once {
        let report = engine
            .run_once(&reporter)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!(
            crawled = report.crawled,
            skipped = report.skipped,
            files = report.commit.files_written,
            published = report.dispatch.published,
            "Single cycle finished"
        );
        return Ok(());
    }

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    engine
        .run(cancel_token, &reporter)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
