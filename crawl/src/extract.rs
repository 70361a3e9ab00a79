//! Finds hyperlinks and images in page markup.
//!
//! Markup is first traversed structurally with an HTML5 parser. Pages on the
//! open web are frequently malformed or partial though, so if that fails (or
//! comes back empty while a plain text scan does find references), the
//! markup is scanned with regular expressions instead.
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::Error;

lazy_static! {
    static ref LINK_RE: Regex =
        Regex::new(r#"<a[^>]+\bhref=["']([^"'><]*?)["']"#).expect("invalid link regex");
    static ref IMAGE_RE: Regex =
        Regex::new(r#"<img[^>]+\bsrc=["']([^"'><]*?)["']"#).expect("invalid image regex");
}

/// An `<img>` element, with the attributes relevant for naming it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageRef {
    pub src: String,
    pub class: String,
    pub alt: String,
}

/// All references found on a page, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct References {
    pub links: Vec<String>,
    pub images: Vec<ImageRef>,
}

impl References {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len() + self.images.len()
    }
}

/// Extracts all link targets and image references from the markup.
pub fn extract(markup: &str) -> References {
    match structural(markup) {
        Ok(references) if !references.is_empty() => references,
        Ok(_) => {
            let references = scan(markup);
            if !references.is_empty() {
                debug!(
                    references = references.len(),
                    "structural traversal found nothing, using scanned references"
                );
            }
            references
        }
        Err(e) => {
            warn!(err = %e, "structural traversal failed, scanning markup");
            scan(markup)
        }
    }
}

/// Parses the markup as a HTML document, and selects `<a>` and `<img>`
/// elements.
pub fn structural(markup: &str) -> Result<References, Error> {
    let link_selector = Selector::parse("a[href]").map_err(|e| Error::Parse(e.to_string()))?;
    let image_selector = Selector::parse("img[src]").map_err(|e| Error::Parse(e.to_string()))?;

    let document = Html::parse_document(markup);

    let links = document
        .select(&link_selector)
        .filter_map(|element| element.value().attr("href"))
        .map(str::to_owned)
        .collect();

    let images = document
        .select(&image_selector)
        .filter_map(|element| {
            let element = element.value();
            Some(ImageRef {
                src: element.attr("src")?.to_owned(),
                class: element.attr("class").unwrap_or_default().to_owned(),
                alt: element.attr("alt").unwrap_or_default().to_owned(),
            })
        })
        .collect();

    Ok(References { links, images })
}

/// Scans the raw markup for `href` attributes of `<a>` and `src` attributes
/// of `<img>` tags. `class` and `alt` are not recovered.
pub fn scan(markup: &str) -> References {
    References {
        links: LINK_RE
            .captures_iter(markup)
            .map(|c| c[1].to_owned())
            .collect(),
        images: IMAGE_RE
            .captures_iter(markup)
            .map(|c| ImageRef {
                src: c[1].to_owned(),
                ..Default::default()
            })
            .collect(),
    }
}
