//! URL to trackable hostname resolution.

use url::Url;

/// Schemes that are never tracked nor policy-checked: browser-internal
/// pages, extension pages and non-navigable pseudo-URLs.
const INTERNAL_SCHEMES: &[&str] = &[
    "chrome",
    "chrome-extension",
    "edge",
    "moz-extension",
    "about",
    "devtools",
    "view-source",
    "javascript",
    "data",
    "blob",
];

/// Whether the URL uses an internal or non-navigable scheme.
#[must_use]
pub fn is_internal(url: &str) -> bool {
    INTERNAL_SCHEMES.iter().any(|scheme| {
        url.len() > scheme.len()
            && url.as_bytes()[scheme.len()] == b':'
            && url[..scheme.len()].eq_ignore_ascii_case(scheme)
    })
}

/// Resolve a URL to its canonical hostname: parseable, non-internal,
/// with any leading `www.` label stripped. Returns `None` otherwise.
#[must_use]
pub fn resolve(url: &str) -> Option<String> {
    if is_internal(url) {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}
