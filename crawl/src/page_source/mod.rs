use async_trait::async_trait;
use tracing::instrument;
use url::Url;

use crate::{fetcher::Fetcher, Error};

mod webdriver;

pub use self::webdriver::{
    capabilities, ChromeDriverConfig, ChromeDriverService, WebDriverPageSource,
    DEFAULT_DRIVER_PATH, DEFAULT_DRIVER_PORT,
};

/// Provides the markup of a page.
///
/// Which implementation is used is decided once, when mounting: either
/// the raw response body ([RawPageSource]), or the DOM after a browser
/// executed the page's scripts ([WebDriverPageSource]).
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn page_source(&self, url: &Url) -> Result<String, Error>;
}

#[async_trait]
impl<A> PageSource for A
where
    A: AsRef<dyn PageSource> + Send + Sync,
{
    async fn page_source(&self, url: &Url) -> Result<String, Error> {
        self.as_ref().page_source(url).await
    }
}

/// Returns the response body of a plain fetch.
/// Bodies that aren't valid UTF-8 are decoded lossily.
pub struct RawPageSource<F> {
    fetcher: F,
}

impl<F> RawPageSource<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F> PageSource for RawPageSource<F>
where
    F: Fetcher,
{
    #[instrument(skip_all, fields(url = %url))]
    async fn page_source(&self, url: &Url) -> Result<String, Error> {
        let data = self.fetcher.fetch(url).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}
