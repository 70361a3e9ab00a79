use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::Error;

mod http;
mod memory;

pub use self::http::{HttpFetcher, HttpFetcherConfig};
pub use self::memory::MemoryFetcher;

/// Retrieves the raw bytes behind a URL.
///
/// Used for remote images, and (through
/// [RawPageSource](crate::page_source::RawPageSource)) for pages.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the resource at the given URL.
    /// Unreachable hosts as well as unsuccessful responses are errors.
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error>;
}

#[async_trait]
impl<A> Fetcher for A
where
    A: AsRef<dyn Fetcher> + Send + Sync,
{
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error> {
        self.as_ref().fetch(url).await
    }
}
