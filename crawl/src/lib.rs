mod errors;

pub mod crawler;
pub mod extract;
pub mod fetcher;
pub mod fixtures;
pub mod image;
pub mod normalize;
pub mod page_source;

pub use crawler::{CrawlEntry, CrawlEntryKind, Crawler, CrawlerConfig};
pub use errors::Error;
