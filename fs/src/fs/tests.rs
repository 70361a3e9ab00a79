use std::{io, path::Path, sync::Arc};

use pagefs_crawl::{
    fetcher::MemoryFetcher, fixtures, page_source::RawPageSource, Crawler, CrawlerConfig,
};
use tempfile::TempDir;
use tokio_stream::{wrappers::ReadDirStream, StreamExt};
use url::Url;

use super::{fuse::FuseDaemon, PageFs};
use crate::Vfs;

const ROOT_PAGE: &str =
    r#"<html><body><img src="http://x.test/cat.png" alt="cat"><a href="/gallery">g</a></body></html>"#;
const GALLERY_PAGE: &str = r#"<html><body><img src="/dog.gif"><a href="/">home</a></body></html>"#;

fn url(s: &str) -> Url {
    Url::parse(s).expect("test url must parse")
}

fn gen_fetcher() -> MemoryFetcher {
    let fetcher = MemoryFetcher::default();
    fetcher.insert(url("http://x.test/"), ROOT_PAGE);
    fetcher.insert(url("http://x.test/gallery"), GALLERY_PAGE);
    fetcher.insert(url("http://x.test/cat.png"), fixtures::PNG_IMAGE.clone());
    fetcher.insert(url("http://x.test/dog.gif"), fixtures::GIF_IMAGE.clone());
    fetcher
}

fn do_mount<P: AsRef<Path>>(fetcher: &MemoryFetcher, mountpoint: P) -> io::Result<FuseDaemon> {
    let crawler = Crawler::new(
        Arc::new(RawPageSource::new(fetcher.clone())),
        Arc::new(fetcher.clone()),
        CrawlerConfig::default(),
    );
    let fs = PageFs::new(Arc::new(Vfs::new(crawler, url("http://x.test/"))));

    FuseDaemon::new(fs, mountpoint.as_ref(), 4, false)
}

/// Returns the names in a directory, sorted.
async fn list(p: &Path) -> io::Result<Vec<String>> {
    let mut it = ReadDirStream::new(tokio::fs::read_dir(p).await?);
    let mut names = Vec::new();
    while let Some(e) = it.next().await {
        names.push(e?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Ensure mounting itself doesn't fail, and doesn't crawl anything.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mount() {
    // https://plume.benboeckel.net/~/JustAnotherBlog/skipping-tests-in-rust
    if !std::path::Path::new("/dev/fuse").exists() {
        eprintln!("skipping test");
        return;
    }
    let tmpdir = TempDir::new().unwrap();
    let fetcher = gen_fetcher();

    let fuse_daemon = do_mount(&fetcher, tmpdir.path()).expect("must succeed");

    let metadata = tokio::fs::metadata(tmpdir.path())
        .await
        .expect("must succeed");
    assert!(metadata.is_dir());
    assert!(metadata.permissions().readonly());
    assert_eq!(0, fetcher.total_fetches());

    fuse_daemon.unmount().expect("unmount");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_root() {
    // https://plume.benboeckel.net/~/JustAnotherBlog/skipping-tests-in-rust
    if !std::path::Path::new("/dev/fuse").exists() {
        eprintln!("skipping test");
        return;
    }
    let tmpdir = TempDir::new().unwrap();
    let fetcher = gen_fetcher();

    let fuse_daemon = do_mount(&fetcher, tmpdir.path()).expect("must succeed");

    {
        let names = list(tmpdir.path()).await.expect("must list");
        assert_eq!(2, names.len());
        assert!(names[0].starts_with("cat") && names[0].ends_with(".png"));
        assert_eq!("x.test_gallery", names[1]);

        let image = tmpdir.path().join(&names[0]);
        let metadata = tokio::fs::metadata(&image).await.expect("must succeed");
        assert!(metadata.is_file());
        assert!(metadata.permissions().readonly());
        assert_eq!(fixtures::PNG_IMAGE.len() as u64, metadata.len());

        let data = tokio::fs::read(&image).await.expect("must read");
        assert_eq!(fixtures::PNG_IMAGE.as_slice(), data.as_slice());

        let metadata = tokio::fs::metadata(tmpdir.path().join("x.test_gallery"))
            .await
            .expect("must succeed");
        assert!(metadata.is_dir());
    }

    fuse_daemon.unmount().expect("unmount");
}

/// Entering a link crawls it, once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn descend() {
    // https://plume.benboeckel.net/~/JustAnotherBlog/skipping-tests-in-rust
    if !std::path::Path::new("/dev/fuse").exists() {
        eprintln!("skipping test");
        return;
    }
    let tmpdir = TempDir::new().unwrap();
    let fetcher = gen_fetcher();

    let fuse_daemon = do_mount(&fetcher, tmpdir.path()).expect("must succeed");

    {
        let gallery = tmpdir.path().join("x.test_gallery");

        // a lookup of the link populates the root, but not the gallery.
        tokio::fs::metadata(&gallery).await.expect("must succeed");
        assert_eq!(1, fetcher.fetch_count(&url("http://x.test/")));
        assert_eq!(0, fetcher.fetch_count(&url("http://x.test/gallery")));

        let names = list(&gallery).await.expect("must list");
        assert_eq!(vec!["dog.gif".to_string(), "x.test".to_string()], names);

        let data = tokio::fs::read(gallery.join("dog.gif"))
            .await
            .expect("must read");
        assert_eq!(fixtures::GIF_IMAGE.as_slice(), data.as_slice());

        list(&gallery).await.expect("must list");
        assert_eq!(1, fetcher.fetch_count(&url("http://x.test/gallery")));
    }

    fuse_daemon.unmount().expect("unmount");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn not_found() {
    // https://plume.benboeckel.net/~/JustAnotherBlog/skipping-tests-in-rust
    if !std::path::Path::new("/dev/fuse").exists() {
        eprintln!("skipping test");
        return;
    }
    let tmpdir = TempDir::new().unwrap();
    let fetcher = gen_fetcher();

    let fuse_daemon = do_mount(&fetcher, tmpdir.path()).expect("must succeed");

    {
        let err = tokio::fs::metadata(tmpdir.path().join("nope"))
            .await
            .expect_err("must fail");
        assert_eq!(io::ErrorKind::NotFound, err.kind());

        // listing a file fails.
        let names = list(tmpdir.path()).await.expect("must list");
        let err = list(&tmpdir.path().join(&names[0]))
            .await
            .expect_err("must fail");
        assert_eq!(Some(libc::ENOTDIR), err.raw_os_error());
    }

    fuse_daemon.unmount().expect("unmount");
}

/// The tree is read-only.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_only() {
    // https://plume.benboeckel.net/~/JustAnotherBlog/skipping-tests-in-rust
    if !std::path::Path::new("/dev/fuse").exists() {
        eprintln!("skipping test");
        return;
    }
    let tmpdir = TempDir::new().unwrap();
    let fetcher = gen_fetcher();

    let fuse_daemon = do_mount(&fetcher, tmpdir.path()).expect("must succeed");

    {
        tokio::fs::write(tmpdir.path().join("new"), b"data")
            .await
            .expect_err("must fail");
        tokio::fs::create_dir(tmpdir.path().join("newdir"))
            .await
            .expect_err("must fail");
    }

    fuse_daemon.unmount().expect("unmount");
}

/// An unreachable seed page fails the listing, without poisoning the root.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_root() {
    // https://plume.benboeckel.net/~/JustAnotherBlog/skipping-tests-in-rust
    if !std::path::Path::new("/dev/fuse").exists() {
        eprintln!("skipping test");
        return;
    }
    let tmpdir = TempDir::new().unwrap();
    let fetcher = MemoryFetcher::default();

    let fuse_daemon = do_mount(&fetcher, tmpdir.path()).expect("must succeed");

    {
        let err = list(tmpdir.path()).await.expect_err("must fail");
        assert_eq!(Some(libc::EIO), err.raw_os_error());

        fetcher.insert(url("http://x.test/"), GALLERY_PAGE);
        fetcher.insert(url("http://x.test/dog.gif"), fixtures::GIF_IMAGE.clone());

        let names = list(tmpdir.path()).await.expect("must list");
        assert_eq!(vec!["dog.gif".to_string(), "x.test".to_string()], names);
    }

    fuse_daemon.unmount().expect("unmount");
}
