use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Proxy, StatusCode};
use rook_core::config::EngineConfig;
use rook_core::outcome::FetchOutcome;
use rook_core::traits::PageFetcher;

/// HTTP fetcher for channel pages using reqwest.
///
/// Classifies every response into a [`FetchOutcome`] instead of erroring:
/// retries of connection failures, timeouts and 5xx happen here (doubling
/// backoff with jitter, bounded by the attempt budget), while 429 is
/// surfaced immediately so the pacing controller decides what to do with
/// it.
///
/// reqwest binds a proxy at client-build time, so proxied requests go
/// through a small per-proxy client cache instead of one shared client.
#[derive(Clone)]
pub struct HttpFetcher {
    base_url: String,
    timeout: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
}

impl HttpFetcher {
    pub fn new(config: &EngineConfig) -> Result<Self, rook_core::CrawlError> {
        let base = url::Url::parse(&config.base_url).map_err(|e| {
            rook_core::CrawlError::ConfigError(format!(
                "invalid base URL {}: {}",
                config.base_url, e
            ))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(rook_core::CrawlError::ConfigError(format!(
                "base URL scheme '{}' is not allowed (only http/https)",
                base.scheme()
            )));
        }

        let direct = build_client(config.request_timeout, None)
            .map_err(|e| rook_core::CrawlError::HttpError(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            direct,
            proxied: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, String> {
        let Some(address) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut cache = self
            .proxied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = cache.get(address) {
            return Ok(client.clone());
        }
        let client =
            build_client(self.timeout, Some(address)).map_err(|e| e.to_string())?;
        cache.insert(address.to_string(), client.clone());
        Ok(client)
    }

    async fn attempt(&self, url: &str, client: &Client) -> AttemptResult {
        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return AttemptResult::Retry(format!("timeout after {}s", self.timeout.as_secs()));
            }
            Err(e) if e.is_connect() => {
                return AttemptResult::Retry(format!("connection failed: {e}"));
            }
            Err(e) => return AttemptResult::Retry(e.to_string()),
        };

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => AttemptResult::Done(FetchOutcome::NotFound),
            StatusCode::FORBIDDEN => AttemptResult::Done(FetchOutcome::Forbidden),
            StatusCode::TOO_MANY_REQUESTS => AttemptResult::Done(FetchOutcome::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            }),
            s if s.is_server_error() => AttemptResult::Retry(format!("server error {s}")),
            s if s.is_success() => match response.text().await {
                Ok(body) if body_rate_limited(&body) => {
                    AttemptResult::Done(FetchOutcome::RateLimited { retry_after: None })
                }
                Ok(body) => AttemptResult::Done(FetchOutcome::Success {
                    body,
                    status: s.as_u16(),
                }),
                Err(e) => AttemptResult::Retry(format!("failed to read body: {e}")),
            },
            s => AttemptResult::RetryUnexpected(format!("unexpected HTTP {s}")),
        }
    }
}

enum AttemptResult {
    Done(FetchOutcome),
    /// Network failure, timeout or 5xx. Exhausted, this ends `Transient`.
    Retry(String),
    /// Unclassifiable status. Retried the same way, but exhausted it ends
    /// `Fatal` so the pacing controller never reads it as site pushback.
    RetryUnexpected(String),
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, channel_id: &str, proxy: Option<&str>) -> FetchOutcome {
        let client = match self.client_for(proxy) {
            Ok(c) => c,
            Err(cause) => {
                return FetchOutcome::Fatal {
                    cause: format!("client build failed for {proxy:?}: {cause}"),
                };
            }
        };
        let url = format!("{}/{}", self.base_url, channel_id);

        let mut last_cause = String::new();
        let mut last_unexpected = false;
        for attempt in 1..=self.max_attempts {
            let (cause, unexpected) = match self.attempt(&url, &client).await {
                AttemptResult::Done(outcome) => return outcome,
                AttemptResult::Retry(cause) => (cause, false),
                AttemptResult::RetryUnexpected(cause) => (cause, true),
            };
            tracing::debug!(
                channel = %channel_id,
                attempt,
                %cause,
                "Fetch attempt failed"
            );
            last_cause = cause;
            last_unexpected = unexpected;
            if attempt < self.max_attempts {
                let delay = retry_delay(attempt, self.backoff_base, self.backoff_cap);
                tokio::time::sleep(delay).await;
            }
        }

        let cause = format!("{last_cause} (after {} attempts)", self.max_attempts);
        if last_unexpected {
            FetchOutcome::Fatal { cause }
        } else {
            FetchOutcome::Transient { cause }
        }
    }
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .default_headers(browser_headers())
        .timeout(timeout);
    if let Some(address) = proxy {
        builder = builder.proxy(Proxy::all(address)?);
    }
    builder.build()
}

/// Headers that mimic an ordinary desktop browser session. The site serves
/// a reduced page (or a challenge) to clients that look like bots.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "User-Agent",
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(
        "Accept",
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,\
             image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
    );
    headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));
    headers.insert(
        "Sec-Ch-Ua",
        HeaderValue::from_static(
            "\"Chromium\";v=\"122\", \"Google Chrome\";v=\"122\", \"Not:A-Brand\";v=\"99\"",
        ),
    );
    headers.insert("Sec-Ch-Ua-Mobile", HeaderValue::from_static("?0"));
    headers.insert("Sec-Ch-Ua-Platform", HeaderValue::from_static("\"macOS\""));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers.insert(
        "Upgrade-Insecure-Requests",
        HeaderValue::from_static("1"),
    );
    headers
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Some rate-limit responses come back as a 200 with an interstitial page.
fn body_rate_limited(body: &str) -> bool {
    let head: String = body.chars().take(2048).collect::<String>().to_lowercase();
    head.contains("too many requests") || head.contains("rate limit")
}

/// Doubling backoff with clock-seeded jitter, capped. Jitter keeps
/// parallel workers from retrying in lockstep.
fn retry_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let doubled = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
    let capped = std::cmp::min(doubled, cap);

    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) | 1)
        .unwrap_or(0x9E37_79B9);
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    // 0.8x .. 1.2x
    let factor = 0.8 + (x % 400) as f64 / 1000.0;
    capped.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(60);

        let first = retry_delay(1, base, cap);
        assert!(first >= Duration::from_secs(4) && first <= Duration::from_secs(6));

        let second = retry_delay(2, base, cap);
        assert!(second >= Duration::from_secs(8) && second <= Duration::from_secs(12));

        let deep = retry_delay(10, base, cap);
        assert!(deep <= Duration::from_secs(72), "cap plus jitter bound");
    }

    #[test]
    fn test_body_rate_limit_markers() {
        assert!(body_rate_limited("<html>Too Many Requests</html>"));
        assert!(body_rate_limited("you hit a RATE LIMIT"));
        assert!(!body_rate_limited("<html><body>hello</body></html>"));
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);

        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    /// Serves every connection the same canned status line, forever.
    async fn spawn_status_server(status_line: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    fn local_config(addr: std::net::SocketAddr) -> EngineConfig {
        EngineConfig {
            base_url: format!("http://{addr}"),
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(2),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_unexpected_status_exhausts_retries_as_fatal() {
        let addr = spawn_status_server("418 I'm a teapot").await;
        let fetcher = HttpFetcher::new(&local_config(addr)).unwrap();

        let outcome = fetcher.fetch("somechannel", None).await;
        match outcome {
            FetchOutcome::Fatal { cause } => {
                assert!(cause.contains("unexpected HTTP 418"), "cause: {cause}");
                assert!(cause.contains("after 2 attempts"), "cause: {cause}");
            }
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_exhausts_retries_as_transient() {
        let addr = spawn_status_server("500 Internal Server Error").await;
        let fetcher = HttpFetcher::new(&local_config(addr)).unwrap();

        let outcome = fetcher.fetch("somechannel", None).await;
        assert!(
            matches!(outcome, FetchOutcome::Transient { .. }),
            "expected Transient, got {outcome:?}"
        );
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let config = EngineConfig {
            base_url: "ftp://example.com".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            HttpFetcher::new(&config),
            Err(rook_core::CrawlError::ConfigError(_))
        ));
    }

    #[test]
    fn test_browser_headers_identify_as_browser() {
        let headers = browser_headers();
        let ua = headers.get("User-Agent").unwrap().to_str().unwrap();
        assert!(ua.contains("Mozilla/5.0"));
        assert!(headers.contains_key("Accept-Language"));
    }
}
