use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use article_digest::url::extract_domain;
///
/// let url = Url::parse("https://News.Example.com/story").unwrap();
/// assert_eq!(extract_domain(&url), Some("news.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Checks whether a cookie's `domain` attribute applies to `host`
///
/// Follows the browser rule: a leading dot (or any domain cookie) matches the
/// domain itself and every subdomain; the comparison is case-insensitive.
pub fn cookie_domain_matches(cookie_domain: &str, host: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.').to_lowercase();
    let host = host.to_lowercase();

    if cookie_domain.is_empty() {
        return false;
    }

    host == cookie_domain || host.ends_with(&format!(".{}", cookie_domain))
}
