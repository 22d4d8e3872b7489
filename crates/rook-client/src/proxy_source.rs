//! Public proxy list aggregation.
//!
//! Pulls candidate HTTP proxies from several free list endpoints. Each
//! source failing is survivable; the union of whatever responded is
//! returned. Validation is syntactic only (ip:port) — liveness is the
//! pool's job, via failure-based eviction.

use std::net::Ipv4Addr;
use std::time::Duration;

use reqwest::Client;
use rook_core::error::CrawlError;
use rook_core::traits::ProxySource;

const LIST_URLS: &[&str] = &[
    "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all",
    "https://www.proxy-list.download/api/v1/get?type=http",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://openproxylist.xyz/http.txt",
];

/// Fetches plain-text `ip:port` proxy lists over HTTP.
#[derive(Clone)]
pub struct HttpProxySource {
    client: Client,
}

impl HttpProxySource {
    pub fn new() -> Result<Self, CrawlError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CrawlError::HttpError(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ProxySource for HttpProxySource {
    async fn fetch_proxies(&self) -> Result<Vec<String>, CrawlError> {
        let mut addresses = Vec::new();

        for url in LIST_URLS {
            let body = match self.client.get(*url).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(ok) => ok.text().await.unwrap_or_default(),
                    Err(e) => {
                        tracing::warn!(%url, error = %e, "Proxy list source rejected request");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Proxy list source unreachable");
                    continue;
                }
            };

            let before = addresses.len();
            addresses.extend(body.lines().filter_map(parse_endpoint));
            tracing::info!(%url, fetched = addresses.len() - before, "Fetched proxy list");
        }

        Ok(addresses)
    }
}

/// Accepts `ip:port` lines, returning a full proxy URL.
fn parse_endpoint(line: &str) -> Option<String> {
    let line = line.trim();
    let (ip, port) = line.split_once(':')?;
    ip.parse::<Ipv4Addr>().ok()?;
    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some(format!("http://{line}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_accepts_ip_port() {
        assert_eq!(
            parse_endpoint("1.2.3.4:8080"),
            Some("http://1.2.3.4:8080".to_string())
        );
        assert_eq!(
            parse_endpoint("  8.8.8.8:80  "),
            Some("http://8.8.8.8:80".to_string())
        );
    }

    #[test]
    fn test_parse_endpoint_rejects_garbage() {
        assert_eq!(parse_endpoint(""), None);
        assert_eq!(parse_endpoint("not-a-proxy"), None);
        assert_eq!(parse_endpoint("1.2.3.4"), None);
        assert_eq!(parse_endpoint("1.2.3.4:0"), None);
        assert_eq!(parse_endpoint("1.2.3.4:99999"), None);
        assert_eq!(parse_endpoint("example.com:8080"), None);
        assert_eq!(parse_endpoint("<html>error</html>"), None);
    }
}
