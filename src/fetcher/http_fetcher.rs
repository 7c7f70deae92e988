use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use crate::app::{Result, TelefeedError};
use crate::fetcher::PageFetcher;

const TME_BASE: &str = "https://t.me/s/";

/// Short TTL: absorbs bursty scheduling of the same channel without
/// hammering the preview endpoint.
const CACHE_TTL: Duration = Duration::from_secs(15);

/// t.me serves a degraded page to obvious bots, so present a browser UA.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/122 Safari/537.36";

pub struct HttpFetcher {
    client: Client,
    cache: Mutex<HashMap<String, (Instant, String)>>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, url: &str) -> Option<String> {
        let mut cache = self.cache.lock().ok()?;
        match cache.get(url) {
            Some((at, body)) if at.elapsed() < CACHE_TTL => Some(body.clone()),
            Some(_) => {
                cache.remove(url);
                None
            }
            None => None,
        }
    }

    fn store(&self, url: &str, body: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            // Drop expired entries so the map stays bounded by the active set.
            cache.retain(|_, (at, _)| at.elapsed() < CACHE_TTL);
            cache.insert(url.to_string(), (Instant::now(), body.to_string()));
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, username: &str) -> Result<String> {
        let url = format!("{}{}", TME_BASE, username);

        if let Some(body) = self.cached(&url) {
            tracing::debug!("cache hit for {}", url);
            return Ok(body);
        }

        let response = self
            .client
            .get(&url)
            .header("accept-language", "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelefeedError::Fetch {
                username: username.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        self.store(&url, &body);
        Ok(body)
    }
}
