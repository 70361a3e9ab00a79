//! Exercises the network-facing parts against servers on localhost.
use std::{sync::Arc, time::Duration};

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use url::Url;

use pagefs_crawl::{
    fetcher::{Fetcher, HttpFetcher, HttpFetcherConfig},
    fixtures,
    page_source::{PageSource, RawPageSource, WebDriverPageSource},
    CrawlEntryKind, Crawler, CrawlerConfig, Error,
};

/// Serves the router on an ephemeral port, and returns its base URL.
async fn serve(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind");
    let addr = listener.local_addr().expect("must have local addr");

    tokio::spawn(async move { axum::serve(listener, router).await });

    Url::parse(&format!("http://{}/", addr)).expect("must parse")
}

fn site() -> Router {
    Router::new()
        .route(
            "/",
            get(|| async {
                r#"<html><body><a href="/about">about</a><img src="/cat.png" alt="cat"><img src="/gone.png"></body></html>"#
            }),
        )
        .route("/cat.png", get(|| async { fixtures::PNG_IMAGE.clone() }))
        .route(
            "/gone.png",
            get(|| async { (StatusCode::NOT_FOUND, "not found") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "finally"
            }),
        )
}

fn gen_fetcher() -> HttpFetcher {
    HttpFetcher::new(&HttpFetcherConfig::default()).expect("must build client")
}

#[tokio::test]
async fn fetch_ok() {
    let base = serve(site()).await;

    let data = gen_fetcher()
        .fetch(&base.join("cat.png").expect("must join"))
        .await
        .expect("fetch must succeed");

    assert_eq!(fixtures::PNG_IMAGE.as_slice(), &data[..]);
}

#[tokio::test]
async fn fetch_not_found() {
    let base = serve(site()).await;

    let err = gen_fetcher()
        .fetch(&base.join("gone.png").expect("must join"))
        .await
        .expect_err("fetch must fail");

    assert!(matches!(err, Error::Fetch { .. }), "{:?}", err);
}

#[tokio::test]
async fn fetch_connection_refused() {
    // bind and drop, so nothing listens on that port anymore.
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind");
    let addr = listener.local_addr().expect("must have local addr");
    drop(listener);

    let url = Url::parse(&format!("http://{}/", addr)).expect("must parse");
    gen_fetcher().fetch(&url).await.expect_err("fetch must fail");
}

#[tokio::test]
async fn fetch_timeout() {
    let base = serve(site()).await;

    let fetcher = HttpFetcher::new(&HttpFetcherConfig {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    })
    .expect("must build client");

    fetcher
        .fetch(&base.join("slow").expect("must join"))
        .await
        .expect_err("fetch must time out");
}

#[tokio::test]
async fn crawl_site() {
    let base = serve(site()).await;
    let fetcher: Arc<dyn Fetcher> = Arc::new(gen_fetcher());

    let crawler = Crawler::new(
        Arc::new(RawPageSource::new(fetcher.clone())),
        fetcher,
        CrawlerConfig::default(),
    );

    let entries = crawler.crawl(&base).await.expect("crawl must succeed");

    // gone.png is dropped.
    assert_eq!(2, entries.len());

    let image = entries
        .iter()
        .find(|e| matches!(e.kind, CrawlEntryKind::Image(_)))
        .expect("must find image");
    assert!(image.name.starts_with("cat"));
    assert!(image.name.ends_with(".png"));

    let link = entries
        .iter()
        .find(|e| e.kind == CrawlEntryKind::Link)
        .expect("must find link");
    assert_eq!(base.join("about").expect("must join"), link.origin_url);
}

/// Keeps track of what the fake WebDriver server was asked to do.
#[derive(Clone, Default)]
struct DriverState {
    navigated_to: Arc<Mutex<Option<String>>>,
    closed: Arc<Mutex<bool>>,
}

/// A WebDriver server which "renders" pages by echoing their URL.
fn fake_driver(state: DriverState) -> Router {
    Router::new()
        .route(
            "/status",
            get(|| async { Json(json!({"value": {"ready": true, "message": ""}})) }),
        )
        .route(
            "/session",
            post(|| async { Json(json!({"value": {"sessionId": "s1", "capabilities": {}}})) }),
        )
        .route(
            "/session/:id/url",
            post(
                |axum::extract::State(state): axum::extract::State<DriverState>,
                 Json(body): Json<Value>| async move {
                    match body["url"].as_str() {
                        Some(url) if url.contains("broken") => (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(json!({"value": {"error": "unknown error", "message": "net::ERR_NAME_NOT_RESOLVED", "stacktrace": ""}})),
                        ),
                        Some(url) => {
                            *state.navigated_to.lock() = Some(url.to_string());
                            (StatusCode::OK, Json(json!({"value": null})))
                        }
                        None => (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"value": {"error": "invalid argument", "message": "missing url"}})),
                        ),
                    }
                },
            ),
        )
        .route(
            "/session/:id/source",
            get(
                |axum::extract::State(state): axum::extract::State<DriverState>| async move {
                    let url = state.navigated_to.lock().clone().unwrap_or_default();
                    Json(json!({"value": format!(r#"<html><body><a href="{}">self</a></body></html>"#, url)}))
                },
            ),
        )
        .route(
            "/session/:id",
            delete(
                |axum::extract::State(state): axum::extract::State<DriverState>| async move {
                    *state.closed.lock() = true;
                    Json(json!({"value": null}))
                },
            ),
        )
        .with_state(state)
}

#[tokio::test]
async fn webdriver_page_source() {
    let state = DriverState::default();
    let endpoint = serve(fake_driver(state.clone())).await;

    let page_source = WebDriverPageSource::connect(endpoint)
        .await
        .expect("must connect");

    let url = Url::parse("http://x.test/page").expect("must parse");
    let markup = page_source
        .page_source(&url)
        .await
        .expect("must render");

    assert_eq!(Some(url.to_string()), *state.navigated_to.lock());
    assert!(markup.contains(r#"href="http://x.test/page""#), "{}", markup);

    page_source.shutdown().await.expect("must shut down");
    assert!(*state.closed.lock());
}

#[tokio::test]
async fn webdriver_navigation_error() {
    let endpoint = serve(fake_driver(DriverState::default())).await;

    let page_source = WebDriverPageSource::connect(endpoint)
        .await
        .expect("must connect");

    let err = page_source
        .page_source(&Url::parse("http://broken.test/").expect("must parse"))
        .await
        .expect_err("must fail");

    match err {
        Error::Renderer(msg) => assert!(msg.contains("ERR_NAME_NOT_RESOLVED"), "{}", msg),
        e => panic!("unexpected error: {:?}", e),
    }
}
