use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::{Client, Proxy};
use url::Url;

use crate::error::Result;
use crate::models::Source;

/// Presented to every feed host. Challenge-happy CDNs serve an
/// interstitial instead of XML when the agent doesn't look like a real
/// desktop browser.
const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Ubuntu Chromium/124.0.0.0 Chrome/124.0.0.0 Safari/537.36";

pub struct FeedFetcher {
    client: Client,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        let timeout = Duration::from_secs(timeout_secs);
        let client = builder_with_fingerprint(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, timeout }
    }

    /// Fetch the raw feed body for one source, honoring its proxy if set.
    /// Transport errors and non-2xx statuses surface as errors; the caller
    /// treats them as per-source failures.
    pub async fn fetch(&self, source: &Source) -> Result<Vec<u8>> {
        let response = self.client_for(source)?.get(&source.url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Proxied sources get their own client with the same fingerprint; a
    /// bad proxy URL is a per-source failure, not a batch abort.
    fn client_for(&self, source: &Source) -> Result<Client> {
        match source.proxy() {
            None => Ok(self.client.clone()),
            Some(proxy) => {
                let client = builder_with_fingerprint(self.timeout)
                    .proxy(Proxy::all(proxy)?)
                    .build()?;
                Ok(client)
            }
        }
    }
}

fn builder_with_fingerprint(timeout: Duration) -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT_STRING)
        .default_headers(headers)
        .cookie_store(true)
}

/// Derive the filesystem-safe identifier naming a source's capture file
/// and XML dump. Deterministic: the same URL always maps to the same
/// identifier.
pub fn source_identifier(url: &str) -> String {
    let name = match Url::parse(url) {
        Ok(parsed) => {
            let mut name = String::new();
            if let Some(host) = parsed.host_str() {
                name.push_str(host);
            }
            if let Some(port) = parsed.port() {
                name.push(':');
                name.push_str(&port.to_string());
            }
            name.push_str(parsed.path());
            name
        }
        // Not a parseable URL; drop any scheme prefix textually.
        Err(_) => url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string(),
    };

    let name: String = name
        .chars()
        .map(|c| if matches!(c, '/' | ':' | '.') { '_' } else { c })
        .collect();

    if name.is_empty() {
        return "feed".to_string();
    }
    name.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_strips_scheme_and_punctuation() {
        assert_eq!(
            source_identifier("http://example.com/rss"),
            "example_com_rss"
        );
        assert_eq!(
            source_identifier("https://feeds.npr.org/1001/rss.xml"),
            "feeds_npr_org_1001_rss_xml"
        );
    }

    #[test]
    fn test_identifier_ignores_query() {
        assert_eq!(
            source_identifier("http://example.com/rss?page=2"),
            "example_com_rss"
        );
    }

    #[test]
    fn test_identifier_keeps_port() {
        assert_eq!(
            source_identifier("http://example.com:8080/rss"),
            "example_com_8080_rss"
        );
    }

    #[test]
    fn test_identifier_caps_length() {
        let url = format!("http://example.com/{}", "a".repeat(100));
        let id = source_identifier(&url);
        assert_eq!(id.chars().count(), 50);
    }

    #[test]
    fn test_identifier_is_deterministic() {
        let url = "http://habr.com/rss/all";
        assert_eq!(source_identifier(url), source_identifier(url));
        assert_eq!(source_identifier(url), "habr_com_rss_all");
    }

    #[test]
    fn test_identifier_never_empty() {
        assert_eq!(source_identifier("http://"), "feed");
        assert_eq!(source_identifier(""), "feed");
    }
}
