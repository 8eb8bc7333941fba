//! URL handling for Sumi-Loom
//!
//! Normalization produces the comparison key used by the seen store, and
//! the politeness key functions decide which rate-limit bucket a URL
//! belongs to.

mod normalize;

pub use normalize::normalize_url;

use serde::Deserialize;
use url::Url;

/// How URLs are grouped into politeness buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMode {
    /// One bucket per host name (`example.com`)
    #[default]
    Host,
    /// One bucket per scheme, host and port (`https://example.com:8443`)
    Origin,
}

/// Computes the politeness key for a URL
///
/// Unparseable URLs share a single `"invalid"` bucket rather than failing,
/// so the task still flows to the fetcher where the error is reported.
///
/// # Examples
///
/// ```
/// use sumi_loom::url::{politeness_key, KeyMode};
///
/// assert_eq!(politeness_key("https://WWW.Example.com/a", KeyMode::Host), "www.example.com");
/// assert_eq!(
///     politeness_key("http://example.com:8080/a", KeyMode::Origin),
///     "http://example.com:8080"
/// );
/// ```
pub fn politeness_key(url: &str, mode: KeyMode) -> String {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return "invalid".to_string(),
    };

    match mode {
        KeyMode::Host => parsed.host_str().unwrap_or("invalid").to_lowercase(),
        KeyMode::Origin => parsed.origin().ascii_serialization(),
    }
}

/// Returns the comparison key the seen store uses for an identifier
///
/// Identifiers that do not parse as HTTP(S) URLs are compared verbatim
/// (trimmed), which keeps dedup working for opaque identifiers.
pub fn dedup_key(identifier: &str) -> String {
    match normalize_url(identifier) {
        Ok(url) => url.to_string(),
        Err(_) => identifier.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_ignores_path_and_scheme() {
        assert_eq!(
            politeness_key("https://example.com/a", KeyMode::Host),
            politeness_key("http://example.com/b?x=1", KeyMode::Host)
        );
    }

    #[test]
    fn test_origin_key_distinguishes_ports() {
        assert_ne!(
            politeness_key("http://127.0.0.1:1000/", KeyMode::Origin),
            politeness_key("http://127.0.0.1:2000/", KeyMode::Origin)
        );
    }

    #[test]
    fn test_invalid_url_bucket() {
        assert_eq!(politeness_key("::nope::", KeyMode::Host), "invalid");
    }

    #[test]
    fn test_dedup_key_collapses_equivalents() {
        assert_eq!(
            dedup_key("https://Example.com/a/#frag"),
            dedup_key("https://example.com/a")
        );
        assert_eq!(dedup_key("  opaque-id "), "opaque-id");
    }
}
