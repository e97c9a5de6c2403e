use crate::UrlError;
use url::Url;

/// Tracking query parameters removed during normalization
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "mc_cid", "_ga"];

/// Schemes the crawler is willing to fetch
const SAFE_SCHEMES: &[&str] = &["http", "https"];

/// Normalizes a URL so that equivalent spellings compare equal
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed, not http(s), or missing a host
/// 2. Lowercase the scheme and host, drop a default port, resolve `.` and
///    `..` segments (all done by the parser)
/// 3. Collapse repeated slashes in the path; an empty path becomes `/`
/// 4. Remove the fragment
/// 5. Remove tracking query parameters (`utm_*` and a fixed list)
/// 6. Sort the remaining query parameters and re-encode them
/// 7. Drop an empty query string
///
/// Trailing slashes are kept because servers commonly treat `/docs` and
/// `/docs/` as different resources. Normalizing an already normalized URL
/// returns it unchanged.
///
/// # Examples
///
/// ```
/// use sumi_tide::url::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM:443/a/./b/?utm_source=x&z=1&a=2#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a/b/?a=2&z=1");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if !SAFE_SCHEMES.contains(&url.scheme()) {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Returns true when the URL uses a scheme the crawler may fetch
///
/// # Examples
///
/// ```
/// use sumi_tide::url::is_safe_scheme;
///
/// assert!(is_safe_scheme("https://example.com/"));
/// assert!(!is_safe_scheme("javascript:alert(1)"));
/// assert!(!is_safe_scheme("mailto:someone@example.com"));
/// ```
pub fn is_safe_scheme(url_str: &str) -> bool {
    Url::parse(url_str.trim())
        .map(|url| SAFE_SCHEMES.contains(&url.scheme()))
        .unwrap_or(false)
}

/// Collapses empty segments while keeping a trailing slash
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if path.ends_with('/') {
        result.push('/');
    }
    result
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
