use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use data_encoding::{BASE64, BASE64_NOPAD};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, trace, warn, Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use url::Url;

use crate::{
    extract::{self, ImageRef},
    fetcher::Fetcher,
    image::detect_format,
    normalize::{self, compose_name, random_id},
    page_source::PageSource,
    Error,
};


pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Extensions longer than this aren't treated as extensions when renaming
/// colliding entries.
const MAX_EXTENSION_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct CrawlerConfig {
    /// How many links and images of a single page are processed at the same
    /// time.
    pub max_concurrency: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum CrawlEntryKind {
    /// An image, with its contents.
    Image(Bytes),
    /// A hyperlink. Its target is only fetched once somebody navigates into it.
    Link,
}

impl fmt::Debug for CrawlEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlEntryKind::Image(data) => write!(f, "Image({} bytes)", data.len()),
            CrawlEntryKind::Link => write!(f, "Link"),
        }
    }
}

/// A single image or link discovered on a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlEntry {
    /// Usable as a single path component, and unique within the entries
    /// returned by one crawl.
    pub name: String,

    /// Where the entry was discovered at. For links, that's the page to
    /// crawl when navigating into it.
    pub origin_url: Url,

    pub kind: CrawlEntryKind,
}

/// Turns pages into [CrawlEntry]s.
///
/// Each link and image on a page is an independent unit of work. Up to
/// [CrawlerConfig::max_concurrency] of them run at the same time, and
/// failures of individual units only drop that unit.
pub struct Crawler {
    page_source: Arc<dyn PageSource>,
    fetcher: Arc<dyn Fetcher>,
    config: CrawlerConfig,
}

impl Crawler {
    /// The page itself is requested from `page_source`, images are always
    /// retrieved through `fetcher`.
    pub fn new(
        page_source: Arc<dyn PageSource>,
        fetcher: Arc<dyn Fetcher>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            page_source,
            fetcher,
            config,
        }
    }

    /// Retrieves the page at `origin_url`, and returns the entries found on
    /// it. Only a failure to retrieve the page itself is an error.
    #[instrument(skip_all, fields(url = %origin_url, indicatif.pb_show = 1), err)]
    pub async fn crawl(&self, origin_url: &Url) -> Result<Vec<CrawlEntry>, Error> {
        Span::current().pb_set_message(&format!("Crawling {}", origin_url));

        let markup = self.page_source.page_source(origin_url).await?;

        Ok(self.crawl_markup(&markup, origin_url).await)
    }

    /// Returns the entries found in `markup`, with relative references
    /// resolved against `origin_url`.
    pub async fn crawl_markup(&self, markup: &str, origin_url: &Url) -> Vec<CrawlEntry> {
        let references = extract::extract(markup);
        debug!(
            links = references.links.len(),
            images = references.images.len(),
            "extracted references"
        );

        let units: Vec<Unit> = references
            .links
            .into_iter()
            .map(Unit::Link)
            .chain(references.images.into_iter().map(Unit::Image))
            .collect();

        let span = Span::current();
        span.pb_set_style(&pagefs_tracing::PB_PROGRESS_STYLE);
        span.pb_set_length(units.len() as u64);

        let limit = self.config.max_concurrency.max(1);
        let (tx, mut rx) = mpsc::channel(limit);

        // Every unit holds a clone of tx, the original is dropped once all
        // units were driven to completion. Only then does rx see the end.
        let workers = tokio::spawn({
            let fetcher = self.fetcher.clone();
            let origin_url = origin_url.clone();

            async move {
                futures::stream::iter(units)
                    .for_each_concurrent(limit, |unit| {
                        let tx = tx.clone();
                        let fetcher = fetcher.clone();
                        let origin_url = origin_url.clone();
                        let span = span.clone();
                        async move {
                            // each unit runs in its own task, so a panic only loses that unit.
                            let unit_task = tokio::spawn(
                                async move { unit.process(&*fetcher, &origin_url).await }
                                    .in_current_span(),
                            );
                            match unit_task.await {
                                Ok(Some(entry)) => {
                                    // the receiver is only dropped after all senders
                                    let _ = tx.send(entry).await;
                                }
                                Ok(None) => {}
                                Err(e) => error!(err = %e, "crawl unit failed"),
                            }
                            span.pb_inc(1);
                        }
                    })
                    .await;
            }
            .in_current_span()
        });

        let mut entries = EntrySet::default();
        while let Some(entry) = rx.recv().await {
            entries.insert(entry);
        }

        if let Err(e) = workers.await {
            error!(err = %e, "crawl workers failed");
        }

        entries.into_entries()
    }
}

/// A unit of work.
enum Unit {
    Link(String),
    Image(ImageRef),
}

impl Unit {
    async fn process(self, fetcher: &dyn Fetcher, origin_url: &Url) -> Option<CrawlEntry> {
        match self {
            Unit::Link(href) => link_entry(origin_url, &href),
            Unit::Image(image) if normalize::is_data_image(&image.src) => {
                inline_image_entry(origin_url, &image)
            }
            Unit::Image(image) => remote_image_entry(fetcher, origin_url, &image).await,
        }
    }
}

fn link_entry(origin_url: &Url, href: &str) -> Option<CrawlEntry> {
    match normalize::resolve(origin_url, href) {
        Ok(Some(url)) => Some(CrawlEntry {
            name: normalize::link_name(&url),
            origin_url: url,
            kind: CrawlEntryKind::Link,
        }),
        Ok(None) => {
            trace!(href, "skipping non-navigable link");
            None
        }
        Err(e) => {
            warn!(href, err = %e, "dropping link");
            None
        }
    }
}

/// Handles `data:image/…;base64,…` references. The image needs a
/// detectable format, as there's no other way to pick an extension.
fn inline_image_entry(origin_url: &Url, image: &ImageRef) -> Option<CrawlEntry> {
    let data = match decode_data_uri(&image.src) {
        Ok(data) => data,
        Err(e) => {
            warn!(err = %e, "dropping inline image");
            return None;
        }
    };

    let ext = match detect_format(&data) {
        Ok(ext) => ext,
        Err(e) => {
            warn!(err = %e, "dropping inline image of unknown format");
            return None;
        }
    };

    Some(CrawlEntry {
        name: compose_name(&image.class, &format!("{}.{}", random_id(), ext)),
        origin_url: origin_url.clone(),
        kind: CrawlEntryKind::Image(data),
    })
}

fn decode_data_uri(src: &str) -> Result<Bytes, Error> {
    let (header, payload) = src
        .trim()
        .split_once(',')
        .ok_or_else(|| Error::Decode("data uri without payload".to_string()))?;

    if !header.to_ascii_lowercase().ends_with(";base64") {
        return Err(Error::Decode("data uri is not base64-encoded".to_string()));
    }

    let payload: Vec<u8> = payload
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    BASE64
        .decode(&payload)
        .or_else(|_| BASE64_NOPAD.decode(&payload))
        .map(Bytes::from)
        .map_err(|e| Error::Decode(e.to_string()))
}

/// Handles images on the web. They're fetched right away, and named after
/// their alt text, the last segment of their URL, or a random id, in that
/// order of preference.
async fn remote_image_entry(
    fetcher: &dyn Fetcher,
    origin_url: &Url,
    image: &ImageRef,
) -> Option<CrawlEntry> {
    let url = match normalize::resolve(origin_url, &image.src) {
        Ok(Some(url)) => url,
        Ok(None) => {
            trace!(src = %image.src, "skipping non-navigable image");
            return None;
        }
        Err(e) => {
            warn!(src = %image.src, err = %e, "dropping image");
            return None;
        }
    };

    let data = match fetcher.fetch(&url).await {
        Ok(data) => data,
        Err(e) => {
            warn!(url = %url, err = %e, "dropping image");
            return None;
        }
    };

    let name = if !image.alt.is_empty() {
        // alt texts don't carry an extension, so it's taken from the data.
        let id = random_id();
        match detect_format(&data) {
            Ok(ext) => compose_name(&image.alt, &format!("{}.{}", id, ext)),
            Err(e) => {
                debug!(url = %url, err = %e, "unknown image format, leaving out extension");
                compose_name(&image.alt, &id)
            }
        }
    } else if let Some(segment) = normalize::last_segment(&url) {
        compose_name(&segment, "")
    } else {
        random_id()
    };

    Some(CrawlEntry {
        name,
        origin_url: url,
        kind: CrawlEntryKind::Image(data),
    })
}

/// Aggregates the entries of one crawl, keeping names unique.
#[derive(Default)]
struct EntrySet {
    entries: HashMap<String, CrawlEntry>,
}

impl EntrySet {
    /// Inserts an entry. If its name is taken already, it's dropped if it
    /// describes the same resource (the same link twice on a page), or
    /// renamed otherwise.
    fn insert(&mut self, mut entry: CrawlEntry) {
        if let Some(existing) = self.entries.get(&entry.name) {
            if existing.origin_url == entry.origin_url
                && matches!(existing.kind, CrawlEntryKind::Link)
                    == matches!(entry.kind, CrawlEntryKind::Link)
            {
                trace!(name = %entry.name, "dropping duplicate entry");
                return;
            }

            let original_name = entry.name.clone();
            while self.entries.contains_key(&entry.name) {
                entry.name = disambiguate(&original_name, &entry.kind);
            }
            debug!(name = %original_name, new_name = %entry.name, "renamed colliding entry");
        }

        self.entries.insert(entry.name.clone(), entry);
    }

    fn into_entries(self) -> Vec<CrawlEntry> {
        self.entries.into_values().collect()
    }
}

/// Inserts a random id into a name, in front of the extension for images.
fn disambiguate(name: &str, kind: &CrawlEntryKind) -> String {
    let split_at = match kind {
        CrawlEntryKind::Image(_) => name
            .rfind('.')
            .filter(|&i| i > 0 && name.len() - i <= MAX_EXTENSION_LEN)
            .unwrap_or(name.len()),
        CrawlEntryKind::Link => name.len(),
    };
    let (stem, ext) = name.split_at(split_at);

    compose_name(stem, &format!("-{}{}", random_id(), ext))
}
