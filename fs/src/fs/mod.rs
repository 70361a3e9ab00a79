mod file_attr;
mod inode_tracker;

pub mod fuse;

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    ffi::CStr,
    future::Future,
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use fuse_backend_rs::{
    abi::fuse_abi::stat64,
    api::filesystem::{Context, DirEntry, Entry, FileSystem, FsOptions, OpenOptions, ZeroCopyWriter},
};
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use self::{file_attr::gen_file_attr, inode_tracker::InodeTracker};
use crate::{
    vfs::{self, NodeKind, Vfs},
    VfsPath,
};

/// Exposes a [Vfs] as a read-only FUSE filesystem.
///
/// Every path gets an inode the first time the kernel sees it, either as
/// the result of a `lookup` or while listing its parent. Both of these
/// populate the parent directory first, so entering a directory in any way
/// crawls it.
///
/// The tree is append-only, and nodes never change once they're known, so
/// attributes and entries can be cached by the kernel indefinitely.
pub struct PageFs {
    vfs: Arc<Vfs>,

    /// This keeps track of inodes and the paths they refer to.
    inode_tracker: RwLock<InodeTracker>,

    /// This holds the contents of all opened files.
    file_handles: RwLock<HashMap<u64, Bytes>>,

    next_file_handle: AtomicU64,

    tokio_handle: tokio::runtime::Handle,
}

impl PageFs {
    /// Must be called from within a tokio runtime, which is used to run
    /// crawls on.
    pub fn new(vfs: Arc<Vfs>) -> Self {
        Self {
            vfs,
            inode_tracker: RwLock::new(Default::default()),
            file_handles: RwLock::new(Default::default()),
            next_file_handle: AtomicU64::new(1),
            tokio_handle: tokio::runtime::Handle::current(),
        }
    }

    fn path_for_inode(&self, ino: u64) -> io::Result<VfsPath> {
        self.inode_tracker.read().get(ino).ok_or_else(|| {
            debug!(ino, "unknown inode");
            io::Error::from_raw_os_error(libc::ENOENT)
        })
    }

    /// Runs a VFS operation on the tokio runtime, and blocks until it
    /// finished. Listings may crawl, so this can take a while.
    fn block_on_vfs<T, F, Fut>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce(Arc<Vfs>) -> Fut,
        Fut: Future<Output = Result<T, vfs::Error>> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.tokio_handle.spawn(f(self.vfs.clone()));

        match self.tokio_handle.block_on(task) {
            Ok(result) => result.map_err(to_io_error),
            Err(e) => {
                error!(err = %e, "vfs task failed");
                Err(io::Error::from_raw_os_error(libc::EIO))
            }
        }
    }

    /// Lists a directory, crawling it if it wasn't listed before.
    fn list_directory(&self, path: &VfsPath) -> io::Result<Vec<vfs::DirEntry>> {
        let path = path.clone();
        self.block_on_vfs(|vfs| async move { vfs.list_directory(&path).await })
    }

    /// Builds the [Entry] replied to a lookup for a known path.
    fn entry_for(&self, path: VfsPath) -> io::Result<Entry> {
        let attributes = self.vfs.get_attributes(&path).map_err(to_io_error)?;
        let ino = self.inode_tracker.write().put(path);

        Ok(Entry {
            inode: ino,
            attr: gen_file_attr(&attributes, ino).into(),
            attr_timeout: Duration::MAX,
            entry_timeout: Duration::MAX,
            ..Default::default()
        })
    }
}

/// Maps errors to what the kernel expects.
fn to_io_error(e: vfs::Error) -> io::Error {
    let errno = match e {
        vfs::Error::NotFound(_) => libc::ENOENT,
        vfs::Error::NotADirectory(_) => libc::ENOTDIR,
        vfs::Error::MissingOrigin(_) | vfs::Error::Crawl { .. } => {
            warn!(err = %e, "replying with EIO");
            libc::EIO
        }
    };
    io::Error::from_raw_os_error(errno)
}

impl FileSystem for PageFs {
    type Handle = u64;
    type Inode = u64;

    fn init(&self, _capable: FsOptions) -> io::Result<FsOptions> {
        Ok(FsOptions::empty())
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode))]
    fn getattr(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Option<Self::Handle>,
    ) -> io::Result<(stat64, Duration)> {
        let path = self.path_for_inode(inode)?;
        let attributes = self.vfs.get_attributes(&path).map_err(to_io_error)?;

        Ok((gen_file_attr(&attributes, inode).into(), Duration::MAX))
    }

    #[tracing::instrument(skip_all, fields(rq.parent_inode = parent, rq.name = ?name))]
    fn lookup(&self, _ctx: &Context, parent: Self::Inode, name: &CStr) -> io::Result<Entry> {
        let parent_path = self.path_for_inode(parent)?;

        // Names we hand out are always valid UTF-8.
        let name = name
            .to_str()
            .map_err(|_| io::Error::from_raw_os_error(libc::ENOENT))?;

        let path = parent_path
            .join(name)
            .map_err(|_| io::Error::from_raw_os_error(libc::ENOENT))?;

        self.block_on_vfs({
            let name = name.to_owned();
            move |vfs| async move { vfs.lookup(&parent_path, &name).await }
        })?;

        self.entry_for(path)
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode, rq.offset = offset))]
    fn readdir(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _handle: Self::Handle,
        _size: u32,
        offset: u64,
        add_entry: &mut dyn FnMut(DirEntry) -> io::Result<usize>,
    ) -> io::Result<()> {
        let path = self.path_for_inode(inode)?;
        let entries = self.list_directory(&path)?;

        for (i, entry) in entries.iter().skip(offset as usize).enumerate() {
            let child = path
                .join(&entry.name)
                .map_err(|_| io::Error::from_raw_os_error(libc::EIO))?;
            let ino = self.inode_tracker.write().put(child);

            // the second parameter will become the "offset" parameter on the next call.
            let written = add_entry(DirEntry {
                ino,
                offset: offset + i as u64 + 1,
                type_: match entry.kind {
                    NodeKind::Directory => libc::S_IFDIR,
                    NodeKind::File => libc::S_IFREG,
                },
                name: entry.name.as_bytes(),
            })?;
            // If the buffer is full, add_entry will return `Ok(0)`.
            if written == 0 {
                break;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode))]
    fn open(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _flags: u32,
        _fuse_flags: u32,
    ) -> io::Result<(Option<Self::Handle>, OpenOptions, Option<u32>)> {
        let path = self.path_for_inode(inode)?;

        if self.vfs.get_attributes(&path).map_err(to_io_error)?.kind == NodeKind::Directory {
            return Err(io::Error::from_raw_os_error(libc::EISDIR));
        }

        let contents = self.vfs.open_file(&path).map_err(to_io_error)?;

        let fh = self.next_file_handle.fetch_add(1, Ordering::SeqCst);
        debug!(fh, "add file handle");
        self.file_handles.write().insert(fh, contents);

        // contents never change, so the page cache can be kept across opens.
        Ok((Some(fh), OpenOptions::KEEP_CACHE, None))
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode, fh = handle))]
    fn release(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        _flags: u32,
        handle: Self::Handle,
        _flush: bool,
        _flock_release: bool,
        _lock_owner: Option<u64>,
    ) -> io::Result<()> {
        if self.file_handles.write().remove(&handle).is_none() {
            debug!("file handle {} not found", handle);
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(rq.inode = inode, rq.offset = offset, rq.size = size))]
    fn read(
        &self,
        _ctx: &Context,
        inode: Self::Inode,
        handle: Self::Handle,
        w: &mut dyn ZeroCopyWriter,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _flags: u32,
    ) -> io::Result<usize> {
        let contents = match self.file_handles.read().get(&handle) {
            Some(contents) => contents.clone(),
            None => {
                warn!("file handle {} unknown", handle);
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
        };

        // As written in the fuse docs, read should send exactly the number
        // of bytes requested except on EOF or error.
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(contents.len());
        let end = start.saturating_add(size as usize).min(contents.len());

        w.write(&contents[start..end])
    }
}
