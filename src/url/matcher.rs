/// Checks if a host falls inside an allowed domain
///
/// An allowed domain matches itself and every subdomain beneath it. A leading
/// `*.` is accepted and means the same thing. Comparison ignores ASCII case.
///
/// # Examples
///
/// ```
/// use sumi_tide::url::matches_domain;
///
/// assert!(matches_domain("example.com", "example.com"));
/// assert!(matches_domain("example.com", "docs.example.com"));
/// assert!(matches_domain("*.example.com", "api.v2.example.com"));
/// assert!(!matches_domain("example.com", "badexample.com"));
/// assert!(!matches_domain("example.com", "example.org"));
/// ```
pub fn matches_domain(allowed: &str, host: &str) -> bool {
    let allowed = allowed.strip_prefix("*.").unwrap_or(allowed);
    if allowed.is_empty() || host.is_empty() {
        return false;
    }

    let allowed = allowed.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();

    host == allowed
        || host
            .strip_suffix(allowed.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_domain("example.com", "example.com"));
    }

    #[test]
    fn test_exact_no_match() {
        assert!(!matches_domain("example.com", "other.com"));
    }

    #[test]
    fn test_subdomain_matches() {
        assert!(matches_domain("example.com", "blog.example.com"));
        assert!(matches_domain("example.com", "api.v2.example.com"));
    }

    #[test]
    fn test_wildcard_prefix_is_optional() {
        assert!(matches_domain("*.example.com", "example.com"));
        assert!(matches_domain("*.example.com", "blog.example.com"));
    }

    #[test]
    fn test_no_partial_label_match() {
        assert!(!matches_domain("example.com", "notexample.com"));
        assert!(!matches_domain("example.com", "example.com.evil.net"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(matches_domain("Example.COM", "docs.example.com"));
    }

    #[test]
    fn test_empty_strings() {
        assert!(!matches_domain("", "example.com"));
        assert!(!matches_domain("example.com", ""));
        assert!(!matches_domain("*.", "example.com"));
    }

    #[test]
    fn test_ip_address() {
        assert!(matches_domain("127.0.0.1", "127.0.0.1"));
        assert!(!matches_domain("127.0.0.1", "127.0.0.2"));
    }
}
