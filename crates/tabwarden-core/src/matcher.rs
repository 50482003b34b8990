//! Domain pattern matching for the two blocklists.
//!
//! Patterns are stored as the user typed them; both sides are
//! normalized at comparison time. A pattern matches its own domain and
//! any subdomain, never a mere suffix: `reddit.com` matches
//! `old.reddit.com` but not `reddit.com.evil.com`.

/// Normalize a stored pattern: trim, strip an optional scheme, strip a
/// leading `www.` label, drop trailing slashes, lowercase.
#[must_use]
pub fn normalize(pattern: &str) -> String {
    let p = pattern.trim();
    let p = p
        .strip_prefix("https://")
        .or_else(|| p.strip_prefix("http://"))
        .unwrap_or(p);
    let p = p.strip_prefix("www.").unwrap_or(p);
    let p = p.trim_end_matches('/');
    p.to_ascii_lowercase()
}

/// Whether `hostname` matches `pattern` exactly or as a subdomain.
#[must_use]
pub fn matches(hostname: &str, pattern: &str) -> bool {
    let pattern = normalize(pattern);
    if pattern.is_empty() {
        return false;
    }
    let hostname = hostname.strip_prefix("www.").unwrap_or(hostname);
    hostname == pattern || hostname.ends_with(&format!(".{pattern}"))
}

/// Whether any pattern in the list matches. An empty list matches
/// nothing.
#[must_use]
pub fn matches_any(hostname: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| matches(hostname, pattern))
}
