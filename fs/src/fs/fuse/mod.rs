use std::{io, path::Path, sync::Arc};

use fuse_backend_rs::{
    api::{filesystem::FileSystem, server::Server},
    transport::{FuseChannel, FuseSession},
};
use parking_lot::Mutex;
use threadpool::ThreadPool;
use tracing::{debug, error, info, instrument, warn};

/// Name the filesystem shows up with in the mount table.
const FS_NAME: &str = "pagefs";

fn to_io_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// Answers requests arriving on one channel, until the session goes away.
fn serve_channel<FS>(server: &Server<Arc<FS>>, mut channel: FuseChannel)
where
    FS: FileSystem + Sync + Send,
{
    loop {
        let (reader, writer) = match channel.get_request() {
            Ok(Some(request)) => request,
            // the session was unmounted.
            Ok(None) => return,
            Err(e) => {
                warn!(err = %e, "unable to receive fuse request");
                return;
            }
        };

        match server.handle_message(reader, writer.into(), None, None) {
            Ok(_) => {}
            // replies to a session that's shutting down fail with EBADFD.
            Err(fuse_backend_rs::Error::EncodeMessage(e))
                if e.raw_os_error() == Some(libc::EBADFD) =>
            {
                debug!("session closed");
                return;
            }
            Err(e) => error!(err = ?e, "failed to handle fuse request"),
        }
    }
}

/// A mounted read-only [FileSystem], served by a pool of threads.
/// It's unmounted when dropped.
pub struct FuseDaemon {
    session: Mutex<FuseSession>,
    threads: ThreadPool,
}

impl FuseDaemon {
    /// Mounts `fs` at `mountpoint`, and starts `num_threads` (at least one)
    /// threads answering requests.
    #[instrument(skip(fs, mountpoint), fields(mountpoint=?mountpoint), err)]
    pub fn new<FS, P>(
        fs: FS,
        mountpoint: P,
        num_threads: usize,
        allow_other: bool,
    ) -> Result<Self, io::Error>
    where
        FS: FileSystem + Sync + Send + 'static,
        P: AsRef<Path> + std::fmt::Debug,
    {
        let server = Arc::new(Server::new(Arc::new(fs)));

        let mut session =
            FuseSession::new(mountpoint.as_ref(), FS_NAME, "", true).map_err(to_io_error)?;
        session.set_allow_other(allow_other);
        session.mount().map_err(to_io_error)?;

        let num_threads = num_threads.max(1);
        let threads = threadpool::Builder::new()
            .num_threads(num_threads)
            .thread_name("fuse_server".to_string())
            .build();

        for _ in 0..num_threads {
            let channel = session.new_channel().map_err(to_io_error)?;
            let server = server.clone();
            threads.execute(move || serve_channel(&server, channel));
        }

        info!(threads = num_threads, "mounted");

        Ok(FuseDaemon {
            session: Mutex::new(session),
            threads,
        })
    }

    /// Blocks until all serving threads returned, which happens once the
    /// filesystem is unmounted.
    #[instrument(skip_all)]
    pub fn wait(&self) {
        self.threads.join()
    }

    /// Unmounts the filesystem, and waits for the serving threads.
    #[instrument(skip_all, err)]
    pub fn unmount(&self) -> Result<(), io::Error> {
        self.session.lock().umount().map_err(to_io_error)?;

        self.wait();
        Ok(())
    }
}

impl Drop for FuseDaemon {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            error!(err = %e, "failed to unmount fuse filesystem")
        }
    }
}
