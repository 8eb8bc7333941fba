use crate::UrlError;
use url::Url;

/// Query parameters that never change the identity of a resource
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid"];

/// Normalizes a URL into its canonical comparison form
///
/// Two URLs that normalize to the same value are treated as the same unit
/// of work by the seen store. Parsing already lowercases the scheme and
/// host, drops default ports and resolves dot segments; on top of that:
///
/// 1. Only `http` and `https` are accepted
/// 2. The fragment is dropped
/// 3. Repeated slashes collapse and a trailing slash is removed (except root)
/// 4. Tracking parameters (`utm_*`, click ids) are removed
/// 5. Remaining query parameters are sorted by key, then value
/// 6. An empty query string is removed
///
/// # Examples
///
/// ```
/// use sumi_loom::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/./b/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a/b");
/// ```
pub fn normalize_url(raw: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    let path = collapse_path(url.path());
    url.set_path(&path);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

fn collapse_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_host_are_lowercased() {
        let result = normalize_url("HTTPS://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_scheme_is_preserved() {
        let http = normalize_url("http://example.com/a").unwrap();
        let https = normalize_url("https://example.com/a").unwrap();
        assert_ne!(http, https);
    }

    #[test]
    fn test_default_port_dropped() {
        let result = normalize_url("https://example.com:443/a").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a");
    }

    #[test]
    fn test_non_default_port_kept() {
        let result = normalize_url("http://127.0.0.1:8080/a").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/a");
    }

    #[test]
    fn test_fragment_removed() {
        let result = normalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_trailing_and_repeated_slashes() {
        let result = normalize_url("https://example.com//a///b/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a/b");

        let root = normalize_url("https://example.com").unwrap();
        assert_eq!(root.as_str(), "https://example.com/");
    }

    #[test]
    fn test_dot_segments() {
        let result = normalize_url("https://example.com/a/../b/./c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_query_sorted_and_filtered() {
        let result =
            normalize_url("https://example.com/p?b=2&utm_medium=mail&a=1&fbclid=9").unwrap();
        assert_eq!(result.as_str(), "https://example.com/p?a=1&b=2");
    }

    #[test]
    fn test_empty_query_removed() {
        let result = normalize_url("https://example.com/p?utm_source=x").unwrap();
        assert_eq!(result.as_str(), "https://example.com/p");
    }

    #[test]
    fn test_rejects_other_schemes() {
        let result = normalize_url("ftp://example.com/file");
        assert!(matches!(result, Err(UrlError::InvalidScheme(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(normalize_url("not a url"), Err(UrlError::Parse(_))));
    }
}
