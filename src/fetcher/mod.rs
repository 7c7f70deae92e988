pub mod http_fetcher;

use async_trait::async_trait;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;

/// Fetches the raw HTML of a channel's public preview page.
///
/// Retry policy lives in the scheduler, not here.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, username: &str) -> Result<String>;
}
