//! Pure helpers turning references found in markup into absolute URLs, and
//! URLs into names usable as a single path component.
use rand::{distributions::Alphanumeric, Rng};
use url::Url;

use crate::Error;

/// Maximum length of a name, in bytes. Most filesystems refuse longer
/// path components.
pub const MAX_NAME_LEN: usize = 255;

/// Length of the identifiers returned by [random_id].
pub const RANDOM_ID_LEN: usize = 9;

/// Schemes we know how to fetch. Everything else (`javascript:`,
/// `mailto:`, `tel:`, `about:`, …) doesn't point to a page or image.
const NAVIGABLE_SCHEMES: &[&str] = &["http", "https"];

/// Resolves a reference (the value of a `href` or `src` attribute) relative
/// to the URL of the page it was found on.
///
/// Fragments are dropped, as they point into the same resource.
///
/// Returns `Ok(None)` if the resulting URL uses a scheme we can't navigate
/// to, and an error if the reference can't be parsed at all.
pub fn resolve(base: &Url, reference: &str) -> Result<Option<Url>, Error> {
    let mut url = base
        .join(reference.trim())
        .map_err(|e| Error::Parse(format!("invalid reference {:?}: {}", reference, e)))?;

    if NAVIGABLE_SCHEMES.contains(&url.scheme()) {
        url.set_fragment(None);
        Ok(Some(url))
    } else {
        Ok(None)
    }
}

/// Returns true if the reference is an inline image (`data:image/…`).
pub fn is_data_image(reference: &str) -> bool {
    reference
        .trim_start()
        .get(..11)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:image/"))
}

/// Derives the name of a link from its URL: the `scheme://` prefix is
/// dropped, trailing slashes are trimmed, and all remaining slashes become
/// underscores.
///
/// `http://x.test/gallery/` becomes `x.test_gallery`.
pub fn link_name(url: &Url) -> String {
    let s = url.as_str();
    let without_scheme = s
        .strip_prefix(url.scheme())
        .and_then(|rest| rest.strip_prefix("://"))
        .unwrap_or(s);

    compose_name(without_scheme.trim_end_matches('/'), "")
}

/// Returns the last non-empty segment of the URL path, if there is one.
pub fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_owned)
}

/// Builds a name out of an untrusted stem and a trusted suffix (random ids
/// and extensions).
///
/// Path separators and NUL bytes in the stem are replaced, and the stem is
/// truncated so the whole name fits into [MAX_NAME_LEN]. The suffix is never
/// truncated. Names that would be empty, `.` or `..` are prefixed with an
/// underscore.
pub fn compose_name(stem: &str, suffix: &str) -> String {
    let stem = truncate(stem, MAX_NAME_LEN.saturating_sub(suffix.len()));
    let mut name: String = stem
        .chars()
        .map(|c| if c == '/' || c == '\0' { '_' } else { c })
        .collect();
    name.push_str(suffix);

    if name.is_empty() || name == "." || name == ".." {
        name.insert(0, '_');
    }

    name
}

/// Returns a random alphanumeric identifier of [RANDOM_ID_LEN] characters.
///
/// With 62 possible characters per position, collisions within the few
/// hundred entries of a page are negligible.
pub fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_ID_LEN)
        .map(char::from)
        .collect()
}

/// Truncates to at most `max` bytes, on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
