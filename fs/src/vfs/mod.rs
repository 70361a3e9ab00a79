//! The tree of crawled pages, materialized lazily.
//!
//! Every directory starts out uninitialized, with only its origin URL known.
//! The first time it's listed, that URL is crawled, and the entries found
//! there are recorded as its children: images become files, links become
//! directories which are themselves uninitialized. Nothing is ever evicted
//! or refreshed, so the tables only grow over the lifetime of a mount.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::SystemTime,
};

use bytes::Bytes;
use pagefs_crawl::{CrawlEntryKind, Crawler};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::VfsPath;


/// Permission bits of files.
pub const FILE_MODE: u32 = 0o444;
/// Permission bits of directories.
pub const DIRECTORY_MODE: u32 = 0o555;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}: not found")]
    NotFound(VfsPath),

    #[error("{0}: not a directory")]
    NotADirectory(VfsPath),

    /// A directory exists, but we don't know which page it came from.
    #[error("{0}: no origin url recorded")]
    MissingOrigin(VfsPath),

    #[error("unable to crawl {url} for {path}: {source}")]
    Crawl {
        path: VfsPath,
        url: Url,
        #[source]
        source: pagefs_crawl::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub kind: NodeKind,
    /// Content length for files, 0 for directories.
    pub size: u64,
    /// Permission bits only, the file type is in `kind`.
    pub mode: u32,
    /// When the node was discovered.
    pub mtime: SystemTime,
}

impl Attributes {
    fn file(size: u64, mtime: SystemTime) -> Self {
        Self {
            kind: NodeKind::File,
            size,
            mode: FILE_MODE,
            mtime,
        }
    }

    fn directory(mtime: SystemTime) -> Self {
        Self {
            kind: NodeKind::Directory,
            size: 0,
            mode: DIRECTORY_MODE,
            mtime,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
    pub origin_url: Url,
}

/// Entries of a populated directory, keyed by name.
type Entries = Arc<BTreeMap<String, DirEntry>>;

pub struct Vfs {
    crawler: Crawler,
    seed_url: Url,

    attributes: RwLock<HashMap<VfsPath, Attributes>>,
    contents: RwLock<HashMap<VfsPath, Bytes>>,
    origin_urls: RwLock<HashMap<VfsPath, Url>>,

    /// A directory is populated once its cell is initialized. Concurrent
    /// first listings wait on the same cell, so only one of them crawls.
    entries: Mutex<HashMap<VfsPath, Arc<OnceCell<Entries>>>>,
}

impl Vfs {
    /// Creates the tree, with the root bound to `seed_url`. Nothing is
    /// crawled before the root is listed.
    pub fn new(crawler: Crawler, seed_url: Url) -> Self {
        Self {
            crawler,
            seed_url,
            attributes: Default::default(),
            contents: Default::default(),
            origin_urls: Default::default(),
            entries: Default::default(),
        }
    }

    /// Returns the attributes of a node. Nodes are only known once their
    /// parent was populated, with the exception of the root.
    pub fn get_attributes(&self, path: &VfsPath) -> Result<Attributes, Error> {
        if path.is_root() {
            return Ok(self
                .attributes
                .write()
                .entry(VfsPath::root())
                .or_insert_with(|| Attributes::directory(SystemTime::now()))
                .clone());
        }

        self.attributes.read().get(path).cloned().ok_or_else(|| {
            debug!(path = %path, "not found");
            Error::NotFound(path.clone())
        })
    }

    /// Returns the entries of a directory, in name order. The first call for
    /// each directory crawls its origin URL; later ones are served from the
    /// tables.
    ///
    /// If the crawl fails, the directory stays uninitialized, and the next
    /// call crawls again.
    #[instrument(skip_all, fields(path = %path), err)]
    pub async fn list_directory(&self, path: &VfsPath) -> Result<Vec<DirEntry>, Error> {
        Ok(self.entries(path).await?.values().cloned().collect())
    }

    /// Returns a single entry of a directory, populating the directory
    /// first like [Vfs::list_directory] does.
    #[instrument(skip_all, fields(parent = %parent, entry = %name), err)]
    pub async fn lookup(&self, parent: &VfsPath, name: &str) -> Result<DirEntry, Error> {
        let entries = self.entries(parent).await?;

        entries.get(name).cloned().ok_or_else(|| {
            debug!("not found");
            Error::NotFound(parent.join(name).unwrap_or_else(|_| parent.clone()))
        })
    }

    async fn entries(&self, path: &VfsPath) -> Result<Entries, Error> {
        if self.get_attributes(path)?.kind != NodeKind::Directory {
            return Err(Error::NotADirectory(path.clone()));
        }

        let cell = self.entries.lock().entry(path.clone()).or_default().clone();
        let entries = cell.get_or_try_init(|| self.populate(path)).await?;

        Ok(entries.clone())
    }

    /// Returns the contents of a file.
    pub fn open_file(&self, path: &VfsPath) -> Result<Bytes, Error> {
        self.contents.read().get(path).cloned().ok_or_else(|| {
            debug!(path = %path, "not found");
            Error::NotFound(path.clone())
        })
    }

    /// Returns true if the directory was populated already.
    pub fn is_populated(&self, path: &VfsPath) -> bool {
        self.entries
            .lock()
            .get(path)
            .is_some_and(|cell| cell.initialized())
    }

    /// Crawls the origin URL of a directory, and records what was found.
    /// The tables are only touched once the crawl succeeded.
    async fn populate(&self, path: &VfsPath) -> Result<Entries, Error> {
        let url = self.origin_url(path)?;

        let crawled = self
            .crawler
            .crawl(&url)
            .await
            .map_err(|source| Error::Crawl {
                path: path.clone(),
                url: url.clone(),
                source,
            })?;

        let now = SystemTime::now();
        let mut entries = BTreeMap::new();

        let mut attributes = self.attributes.write();
        let mut contents = self.contents.write();
        let mut origin_urls = self.origin_urls.write();

        for entry in crawled {
            let child = match path.join(&entry.name) {
                Ok(child) => child,
                Err(e) => {
                    warn!(err = %e, "skipping entry with invalid name");
                    continue;
                }
            };

            let kind = match entry.kind {
                CrawlEntryKind::Image(data) => {
                    attributes.insert(child.clone(), Attributes::file(data.len() as u64, now));
                    contents.insert(child, data);
                    NodeKind::File
                }
                CrawlEntryKind::Link => {
                    attributes.insert(child.clone(), Attributes::directory(now));
                    origin_urls.insert(child, entry.origin_url.clone());
                    NodeKind::Directory
                }
            };

            entries.insert(
                entry.name.clone(),
                DirEntry {
                    name: entry.name,
                    kind,
                    origin_url: entry.origin_url,
                },
            );
        }

        debug!(entries = entries.len(), "populated directory");

        Ok(Arc::new(entries))
    }

    fn origin_url(&self, path: &VfsPath) -> Result<Url, Error> {
        if path.is_root() {
            return Ok(self.seed_url.clone());
        }

        self.origin_urls.read().get(path).cloned().ok_or_else(|| {
            error!(path = %path, "directory without origin url");
            Error::MissingOrigin(path.clone())
        })
    }
}
