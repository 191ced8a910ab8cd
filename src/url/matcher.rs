/// Checks if a domain matches a wildcard pattern
///
/// 1. Exact match: "example.com" matches only "example.com"
/// 2. Wildcard match: "*.example.com" matches the bare domain and any subdomain
///
/// # Examples
///
/// ```
/// use article_digest::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.doubleclick.net", "stats.g.doubleclick.net"));
/// assert!(matches_wildcard("*.doubleclick.net", "doubleclick.net"));
/// assert!(!matches_wildcard("doubleclick.net", "ad.doubleclick.net"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}

/// Returns true if `candidate` matches any of the given patterns
pub fn matches_any(patterns: &[&str], candidate: &str) -> bool {
    patterns.iter().any(|p| matches_wildcard(p, candidate))
}
