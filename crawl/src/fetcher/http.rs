use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tracing::{debug, instrument};
use url::Url;

use super::Fetcher;
use crate::Error;

/// Configures a [HttpFetcher].
#[derive(Clone, Debug)]
pub struct HttpFetcherConfig {
    /// Timeout applied to each request as a whole. There's none by default,
    /// so a stalled server stalls the request indefinitely.
    pub timeout: Option<Duration>,

    /// The User-Agent header sent with each request.
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: concat!("pagefs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetches resources over HTTP(S).
#[derive(Clone)]
pub struct HttpFetcher {
    http_client: ClientWithMiddleware,
}

impl HttpFetcher {
    pub fn new(config: &HttpFetcherConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder().user_agent(&config.user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let http_client = builder.build().map_err(|e| Error::Setup(e.to_string()))?;

        Ok(Self {
            http_client: ClientBuilder::new(http_client)
                .with(pagefs_tracing::reqwest::tracing_middleware())
                .build(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error> {
        let resp = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::fetch(url, e))?;

        if !resp.status().is_success() {
            return Err(Error::fetch(url, format!("status {}", resp.status())));
        }

        let data = resp.bytes().await.map_err(|e| Error::fetch(url, e))?;
        debug!(size = data.len(), "fetched");

        Ok(data)
    }
}
