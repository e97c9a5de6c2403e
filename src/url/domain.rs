use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_tide::url::extract_host;
///
/// let url = Url::parse("https://Docs.Example.com:8443/path").unwrap();
/// assert_eq!(extract_host(&url), Some("docs.example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the key used for per-host admission control
///
/// Two URLs share a key when they target the same host and port, so a site
/// served on a non-default port is limited separately from the same host on
/// the default one.
pub fn host_key(url: &Url) -> Option<String> {
    let host = extract_host(url)?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Returns `scheme://host[:port]` for locating per-origin resources such as robots.txt
pub fn origin_of(url: &Url) -> Option<String> {
    host_key(url).map(|key| format!("{}://{}", url.scheme(), key))
}
