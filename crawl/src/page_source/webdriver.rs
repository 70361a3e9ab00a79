//! Obtains rendered markup from a headless Chrome, driven over the W3C
//! WebDriver protocol through a chromedriver process.
use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio::process::{Child, Command};
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::PageSource;
use crate::Error;

pub const DEFAULT_DRIVER_PORT: u16 = 9515;
pub const DEFAULT_DRIVER_PATH: &str = "/usr/local/bin/chromedriver";

/// The browser claims to be a desktop Chrome, some sites serve stripped
/// down markup to headless user agents otherwise.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/69.0.3497.100 Safari/537.36";

/// How often, and in which interval, to poll a freshly started driver for
/// readiness.
const READY_POLL_ATTEMPTS: usize = 50;
const READY_POLL_INTERVAL_MS: u64 = 100;

#[derive(Clone, Debug)]
pub struct ChromeDriverConfig {
    pub driver_path: PathBuf,
    pub port: u16,
}

impl Default for ChromeDriverConfig {
    fn default() -> Self {
        Self {
            driver_path: DEFAULT_DRIVER_PATH.into(),
            port: DEFAULT_DRIVER_PORT,
        }
    }
}

/// The capabilities requested for new sessions: a headless Chrome, with
/// image loading disabled (we fetch images ourselves).
pub fn capabilities() -> serde_json::Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": [
                        "--headless",
                        "--no-sandbox",
                        format!("--user-agent={}", BROWSER_USER_AGENT),
                    ],
                    "prefs": {
                        "profile.managed_default_content_settings.images": 2,
                    },
                },
            },
        },
    })
}

/// Every WebDriver response wraps its payload in a `value` field.
#[derive(Deserialize)]
struct WireResponse<T> {
    value: T,
}

#[derive(Deserialize)]
struct WireError {
    error: String,
    message: String,
}

#[derive(Deserialize)]
struct WireStatus {
    ready: bool,
}

#[derive(Deserialize)]
struct WireSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// A chromedriver process we spawned. It's killed when this is dropped.
pub struct ChromeDriverService {
    child: Mutex<Child>,
    endpoint: Url,
}

impl ChromeDriverService {
    /// Spawns chromedriver, listening on localhost at the configured port.
    #[instrument(err)]
    pub fn spawn(config: &ChromeDriverConfig) -> Result<Self, Error> {
        let endpoint = Url::parse(&format!("http://localhost:{}/", config.port))
            .map_err(|e| Error::Renderer(e.to_string()))?;

        let child = Command::new(&config.driver_path)
            .arg(format!("--port={}", config.port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Renderer(format!(
                    "unable to start {}: {}",
                    config.driver_path.display(),
                    e
                ))
            })?;

        info!(pid = ?child.id(), endpoint = %endpoint, "started chromedriver");

        Ok(Self {
            child: Mutex::new(child),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns an error if the driver process has exited.
    pub fn check_alive(&self) -> Result<(), Error> {
        match self.child.lock().try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(Error::Renderer(format!(
                "chromedriver exited with {}",
                status
            ))),
            Err(e) => Err(Error::Renderer(e.to_string())),
        }
    }

    /// Kills the driver process and waits for it to exit.
    pub async fn stop(self) -> Result<(), Error> {
        let mut child = self.child.into_inner();
        child
            .kill()
            .await
            .map_err(|e| Error::Renderer(format!("unable to stop chromedriver: {}", e)))
    }
}

/// A [PageSource] returning the DOM of a page after a browser loaded it,
/// scripts included.
///
/// There's a single browser session, so navigations are serialized.
pub struct WebDriverPageSource {
    http_client: reqwest::Client,
    endpoint: Url,
    session_id: String,

    /// Held for the whole navigate-then-read sequence.
    navigation: tokio::sync::Mutex<()>,

    /// Set if we spawned the driver ourselves.
    service: Option<ChromeDriverService>,
}

impl WebDriverPageSource {
    /// Spawns chromedriver and opens a browser session on it.
    pub async fn start(config: &ChromeDriverConfig) -> Result<Self, Error> {
        let service = ChromeDriverService::spawn(config)?;
        let mut page_source = Self::connect(service.endpoint().clone()).await?;
        page_source.service = Some(service);

        Ok(page_source)
    }

    /// Opens a browser session on an already running WebDriver server.
    #[instrument(skip_all, err, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: Url) -> Result<Self, Error> {
        let http_client = reqwest::Client::new();

        let client = &http_client;
        let status_url = &join(&endpoint, "status")?;
        Retry::spawn(
            FixedInterval::from_millis(READY_POLL_INTERVAL_MS).take(READY_POLL_ATTEMPTS),
            || async move {
                let status: WireStatus = call(client.get(status_url.clone())).await?;
                if status.ready {
                    Ok(())
                } else {
                    Err(Error::Renderer("driver not ready".to_string()))
                }
            },
        )
        .await?;

        let session: WireSession =
            call(http_client.post(join(&endpoint, "session")?).json(&capabilities())).await?;
        debug!(session.id = %session.session_id, "created browser session");

        Ok(Self {
            http_client,
            endpoint,
            session_id: session.session_id,
            navigation: tokio::sync::Mutex::new(()),
            service: None,
        })
    }

    /// Closes the browser session, and stops the driver if we started it.
    #[instrument(skip_all, err)]
    pub async fn shutdown(self) -> Result<(), Error> {
        let result = match self.session_url("") {
            Ok(url) => call::<serde_json::Value>(self.http_client.delete(url))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if let Some(service) = self.service {
            service.stop().await?;
        }

        result
    }

    /// Returns the URL of a command in our session.
    fn session_url(&self, command: &str) -> Result<Url, Error> {
        join(
            &self.endpoint,
            &format!("session/{}{}", self.session_id, command),
        )
    }
}

#[async_trait]
impl PageSource for WebDriverPageSource {
    #[instrument(skip_all, fields(url = %url), err)]
    async fn page_source(&self, url: &Url) -> Result<String, Error> {
        let _navigation = self.navigation.lock().await;

        if let Some(service) = &self.service {
            service.check_alive()?;
        }

        call::<serde_json::Value>(
            self.http_client
                .post(self.session_url("/url")?)
                .json(&json!({ "url": url.as_str() })),
        )
        .await?;

        call(self.http_client.get(self.session_url("/source")?)).await
    }
}

fn join(base: &Url, path: &str) -> Result<Url, Error> {
    base.join(path).map_err(|e| Error::Renderer(e.to_string()))
}

/// Sends a WebDriver command, and unwraps the `value` of the response.
/// Unsuccessful responses carry an error code and message instead.
async fn call<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, Error> {
    let resp = request
        .send()
        .await
        .map_err(|e| Error::Renderer(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        return Err(match resp.json::<WireResponse<WireError>>().await {
            Ok(WireResponse { value }) => {
                warn!(error = %value.error, message = %value.message, "webdriver command failed");
                Error::Renderer(format!("{}: {}", value.error, value.message))
            }
            Err(_) => Error::Renderer(format!("webdriver responded with {}", status)),
        });
    }

    resp.json::<WireResponse<T>>()
        .await
        .map(|r| r.value)
        .map_err(|e| Error::Renderer(format!("unable to decode webdriver response: {}", e)))
}
