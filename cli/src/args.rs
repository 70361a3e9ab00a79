use std::{path::PathBuf, time::Duration};

use clap::Parser;
use pagefs_crawl::{
    crawler::DEFAULT_MAX_CONCURRENCY,
    fetcher::HttpFetcherConfig,
    page_source::{ChromeDriverConfig, DEFAULT_DRIVER_PATH, DEFAULT_DRIVER_PORT},
    CrawlerConfig,
};
use tracing::Level;
use url::Url;

/// Mounts a web page as a read-only directory tree.
///
/// Images on the page show up as files, links as directories. Directories
/// are crawled the first time they're listed, so the tree grows as it's
/// explored.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Where to mount the tree. Must be an existing directory.
    #[arg(value_name = "MOUNTPOINT")]
    pub mountpoint: PathBuf,

    /// The page shown at the root of the tree.
    #[arg(value_name = "URL")]
    pub url: Url,

    /// Render pages in a headless Chrome, so their scripts are executed,
    /// instead of using the markup as served.
    #[arg(long, env = "PAGEFS_HEADLESS")]
    pub headless: bool,

    /// Port chromedriver listens on in headless mode.
    #[arg(long, env = "PAGEFS_DRIVER_PORT", default_value_t = DEFAULT_DRIVER_PORT)]
    pub driver_port: u16,

    /// Path to the chromedriver executable.
    #[arg(long, env = "PAGEFS_DRIVER_PATH", default_value = DEFAULT_DRIVER_PATH)]
    pub driver_path: PathBuf,

    /// How many links and images of a page are processed concurrently.
    #[arg(long, env = "PAGEFS_MAX_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Timeout for each HTTP request, in seconds. Without one, a stalled
    /// server stalls listing the directory.
    #[arg(long, env = "PAGEFS_FETCH_TIMEOUT")]
    pub fetch_timeout: Option<u64>,

    /// User-Agent sent with HTTP requests.
    #[arg(long, env = "PAGEFS_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Number of threads serving FUSE requests.
    #[arg(long, env = "PAGEFS_THREADS", default_value_t = 4)]
    pub threads: usize,

    /// Allow other users to access the mount.
    #[arg(long, env = "PAGEFS_ALLOW_OTHER")]
    pub allow_other: bool,

    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which will always have
    /// priority.
    #[arg(long, env = "PAGEFS_LOG_LEVEL", default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Show progress bars while crawling.
    #[arg(long, env = "PAGEFS_PROGRESS")]
    pub progress: bool,
}

impl Args {
    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig {
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn http_fetcher_config(&self) -> HttpFetcherConfig {
        let default = HttpFetcherConfig::default();
        HttpFetcherConfig {
            timeout: self.fetch_timeout.map(Duration::from_secs),
            user_agent: self.user_agent.clone().unwrap_or(default.user_agent),
        }
    }

    pub fn chrome_driver_config(&self) -> ChromeDriverConfig {
        ChromeDriverConfig {
            driver_path: self.driver_path.clone(),
            port: self.driver_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::{error::ErrorKind, Parser};
    use rstest::rstest;
    use tracing::Level;

    use super::Args;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["pagefs", "/mnt", "http://x.test/"]).expect("must parse");

        assert_eq!(std::path::PathBuf::from("/mnt"), args.mountpoint);
        assert_eq!("http://x.test/", args.url.as_str());
        assert!(!args.headless);
        assert_eq!(9515, args.driver_port);
        assert_eq!(16, args.crawler_config().max_concurrency);
        assert_eq!(None, args.http_fetcher_config().timeout);
        assert!(args
            .http_fetcher_config()
            .user_agent
            .starts_with("pagefs/"));
        assert_eq!(Level::INFO, args.log_level);
    }

    #[test]
    fn options() {
        let args = Args::try_parse_from([
            "pagefs",
            "--headless",
            "--driver-port",
            "4444",
            "--driver-path",
            "/opt/chromedriver",
            "--max-concurrency",
            "2",
            "--fetch-timeout",
            "30",
            "--user-agent",
            "curl/8",
            "--log-level",
            "debug",
            "/mnt",
            "https://x.test/a/",
        ])
        .expect("must parse");

        assert!(args.headless);

        let driver = args.chrome_driver_config();
        assert_eq!(4444, driver.port);
        assert_eq!(std::path::PathBuf::from("/opt/chromedriver"), driver.driver_path);

        assert_eq!(2, args.crawler_config().max_concurrency);

        let fetcher = args.http_fetcher_config();
        assert_eq!(Some(Duration::from_secs(30)), fetcher.timeout);
        assert_eq!("curl/8", fetcher.user_agent);

        assert_eq!(Level::DEBUG, args.log_level);
    }

    #[rstest]
    #[case::nothing(&["pagefs"])]
    #[case::no_url(&["pagefs", "/mnt"])]
    fn missing_arguments(#[case] argv: &[&str]) {
        let err = Args::try_parse_from(argv).expect_err("must fail");
        assert_eq!(ErrorKind::MissingRequiredArgument, err.kind());
    }

    #[rstest]
    #[case::relative_url(&["pagefs", "/mnt", "x.test/page"])]
    #[case::bad_port(&["pagefs", "--driver-port", "99999", "/mnt", "http://x.test/"])]
    fn invalid_arguments(#[case] argv: &[&str]) {
        let err = Args::try_parse_from(argv).expect_err("must fail");
        assert_ne!(ErrorKind::MissingRequiredArgument, err.kind());
    }
}
