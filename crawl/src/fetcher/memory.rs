use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::instrument;
use url::Url;

use super::Fetcher;
use crate::Error;

/// Serves resources from an in-memory table, and counts how often each URL
/// was requested. URLs not in the table behave like unreachable hosts.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    db: Arc<RwLock<HashMap<Url, Bytes>>>,
    fetches: Arc<RwLock<HashMap<Url, usize>>>,
}

impl MemoryFetcher {
    /// Makes `data` available at `url`, replacing what was there before.
    pub fn insert(&self, url: Url, data: impl Into<Bytes>) {
        self.db.write().insert(url, data.into());
    }

    /// Returns how often `url` was requested, successful or not.
    pub fn fetch_count(&self, url: &Url) -> usize {
        self.fetches.read().get(url).copied().unwrap_or_default()
    }

    /// Returns the number of requests over all URLs.
    pub fn total_fetches(&self) -> usize {
        self.fetches.read().values().sum()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error> {
        *self.fetches.write().entry(url.clone()).or_default() += 1;

        self.db
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::fetch(url, "connection refused"))
    }
}
