use thiserror::Error;
use url::Url;

/// Errors produced while crawling a page.
///
/// Only [Error::Fetch] and [Error::Renderer] ever escape a whole crawl, and
/// only when the page itself couldn't be retrieved. Everything else is
/// contained per item.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to fetch {url}: {reason}")]
    Fetch { url: Url, reason: String },

    #[error("unable to parse: {0}")]
    Parse(String),

    #[error("unable to decode: {0}")]
    Decode(String),

    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("unable to set up http client: {0}")]
    Setup(String),
}

impl Error {
    pub(crate) fn fetch(url: &Url, reason: impl ToString) -> Self {
        Error::Fetch {
            url: url.clone(),
            reason: reason.to_string(),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Parse(msg) | Error::Decode(msg) => {
                Self::new(std::io::ErrorKind::InvalidData, msg)
            }
            e => Self::new(std::io::ErrorKind::Other, e.to_string()),
        }
    }
}
