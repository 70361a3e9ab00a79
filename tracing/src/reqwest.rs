use reqwest_tracing::{SpanBackendWithUrl, TracingMiddleware};

/// Returns a new tracing middleware which can be used with reqwest_middleware.
/// Every outgoing request gets its own span, with the requested `url`
/// recorded into `http.url`, so fetches show up nested below the crawl that
/// issued them.
pub fn tracing_middleware() -> TracingMiddleware<SpanBackendWithUrl> {
    TracingMiddleware::<SpanBackendWithUrl>::new()
}
