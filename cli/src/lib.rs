use std::{future::Future, io::Write, path::PathBuf, sync::Arc};

use pagefs_crawl::{
    fetcher::{Fetcher, HttpFetcher},
    page_source::{PageSource, RawPageSource, WebDriverPageSource},
    Crawler,
};
use pagefs_fs::{
    fs::{fuse::FuseDaemon, PageFs},
    Vfs,
};
use pagefs_tracing::TracingHandle;
use tracing::{info, instrument, warn};

pub mod args;

pub use args::Args;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Crawl(#[from] pagefs_crawl::Error),

    #[error("unable to mount at {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Mounts the page given in `args`, and serves it until the filesystem is
/// unmounted, or the process is interrupted.
#[instrument(skip_all, fields(url = %args.url, mountpoint = ?args.mountpoint), err)]
pub async fn run(args: Args, tracing_handle: TracingHandle) -> Result<(), Error> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&args.http_fetcher_config())?);

    let renderer = if args.headless {
        Some(Arc::new(
            WebDriverPageSource::start(&args.chrome_driver_config()).await?,
        ))
    } else {
        None
    };

    let page_source: Arc<dyn PageSource> = match &renderer {
        Some(renderer) => renderer.clone(),
        None => Arc::new(RawPageSource::new(fetcher.clone())),
    };

    let crawler = Crawler::new(page_source, fetcher, args.crawler_config());
    let fs = PageFs::new(Arc::new(Vfs::new(crawler, args.url.clone())));

    let fuse_daemon = Arc::new(
        tokio::task::spawn_blocking({
            let mountpoint = args.mountpoint.clone();
            let (threads, allow_other) = (args.threads, args.allow_other);
            move || FuseDaemon::new(fs, &mountpoint, threads, allow_other)
        })
        .await?
        .map_err(|source| Error::Mount {
            path: args.mountpoint.clone(),
            source,
        })?,
    );

    writeln!(
        tracing_handle.get_stdout_writer(),
        "serving {} at {}",
        args.url,
        args.mountpoint.display()
    )?;

    serve(&fuse_daemon, tokio::signal::ctrl_c()).await?;
    drop(fuse_daemon);
    info!("unmounted");

    if let Some(renderer) = renderer {
        // Crawls still in flight keep the renderer alive. Dropping it kills
        // chromedriver in that case.
        match Arc::try_unwrap(renderer) {
            Ok(renderer) => renderer.shutdown().await?,
            Err(_) => warn!("renderer still in use, not shutting it down gracefully"),
        }
    }

    Ok(())
}

/// Blocks until the filesystem is unmounted. If `interrupt` resolves first,
/// it's unmounted by us.
///
/// All clones of `fuse_daemon` taken in here are gone once this returns.
async fn serve<I>(fuse_daemon: &Arc<FuseDaemon>, interrupt: I) -> Result<(), Error>
where
    I: Future<Output = std::io::Result<()>>,
{
    let mut wait = tokio::task::spawn_blocking({
        let fuse_daemon = fuse_daemon.clone();
        move || fuse_daemon.wait()
    });

    tokio::select! {
        result = &mut wait => result?,
        interrupted = interrupt => {
            match interrupted {
                Ok(()) => {
                    info!("interrupted, unmounting");
                    let fuse_daemon = fuse_daemon.clone();
                    tokio::task::spawn_blocking(move || fuse_daemon.unmount()).await??;
                }
                Err(e) => warn!(err = %e, "unable to listen for interrupts"),
            }
            wait.await?;
        }
    }

    Ok(())
}
