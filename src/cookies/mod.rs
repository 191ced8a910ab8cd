//! Cookie loading for authenticated page loads
//!
//! Two on-disk formats are accepted:
//! - Netscape `cookies.txt` (tab-separated, `#` comments)
//! - JSON arrays as exported by browser extensions
//!
//! Cookies are parsed once per run and are read-only afterwards. Expiry is
//! checked against the current time before they are injected into a page.

mod json;
mod netscape;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

pub use json::parse_json_cookies;
pub use netscape::parse_netscape_cookies;

/// Errors raised while reading a cookie file
#[derive(Debug, Error)]
pub enum CookieError {
    #[error("Failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON cookie file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed cookie line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Cookie file contains no cookies")]
    Empty,
}

/// SameSite attribute of a cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    /// Parses the spellings used by browsers and export extensions
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" | "no_restriction" => Some(Self::None),
            _ => None,
        }
    }
}

/// A single browser cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    /// Expiry as epoch milliseconds; `None` for session cookies
    pub expires: Option<i64>,
}

impl Cookie {
    /// Returns true if the cookie has an expiry at or before `now_ms`
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires, Some(expires) if expires <= now_ms)
    }

    /// Returns true if the cookie should be sent with a request to `url`
    pub fn matches_url(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };

        if !crate::url::cookie_domain_matches(&self.domain, host) {
            return false;
        }

        if self.secure && url.scheme() != "https" {
            return false;
        }

        let cookie_path = if self.path.is_empty() { "/" } else { &self.path };
        let request_path = url.path();
        request_path == cookie_path
            || (request_path.starts_with(cookie_path)
                && (cookie_path.ends_with('/')
                    || request_path[cookie_path.len()..].starts_with('/')))
    }
}

/// Converts an expiry in epoch seconds (possibly fractional) to milliseconds
///
/// Values that are zero or negative denote session cookies. Values already
/// in milliseconds (beyond year 5138 in seconds) are passed through.
pub(crate) fn expiry_to_millis(value: f64) -> Option<i64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    if value > 1e11 {
        Some(value as i64)
    } else {
        Some((value * 1000.0) as i64)
    }
}

/// Parses cookie file content, detecting the format
///
/// Content whose first non-whitespace character is `[` is treated as JSON;
/// everything else as Netscape format.
pub fn parse_cookies(content: &str) -> Result<Vec<Cookie>, CookieError> {
    let cookies = if content.trim_start().starts_with('[') {
        parse_json_cookies(content)?
    } else {
        parse_netscape_cookies(content)?
    };

    if cookies.is_empty() {
        return Err(CookieError::Empty);
    }

    Ok(cookies)
}

/// Loads and parses a cookie file
pub fn load_cookie_file(path: &Path) -> Result<Vec<Cookie>, CookieError> {
    let content = std::fs::read_to_string(path)?;
    let cookies = parse_cookies(&content)?;
    tracing::info!("Loaded {} cookies from {}", cookies.len(), path.display());
    Ok(cookies)
}

/// Returns the cookies whose expiry lies in the past
pub fn detect_expired_cookies(cookies: &[Cookie]) -> Vec<Cookie> {
    detect_expired_cookies_at(cookies, Utc::now().timestamp_millis())
}

/// Same as [`detect_expired_cookies`] with an explicit clock
pub fn detect_expired_cookies_at(cookies: &[Cookie], now_ms: i64) -> Vec<Cookie> {
    cookies
        .iter()
        .filter(|c| c.is_expired(now_ms))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(domain: &str, path: &str, secure: bool, expires: Option<i64>) -> Cookie {
        Cookie {
            name: "session".to_string(),
            value: "abc".to_string(),
            domain: domain.to_string(),
            path: path.to_string(),
            secure,
            http_only: true,
            same_site: None,
            expires,
        }
    }

    #[test]
    fn test_is_expired() {
        let now = 1_700_000_000_000;
        assert!(cookie(".a.com", "/", false, Some(now - 1)).is_expired(now));
        assert!(cookie(".a.com", "/", false, Some(now)).is_expired(now));
        assert!(!cookie(".a.com", "/", false, Some(now + 1)).is_expired(now));
        assert!(!cookie(".a.com", "/", false, None).is_expired(now));
    }

    #[test]
    fn test_matches_url_domain_and_path() {
        let c = cookie(".example.com", "/news", false, None);
        assert!(c.matches_url(&Url::parse("https://www.example.com/news").unwrap()));
        assert!(c.matches_url(&Url::parse("https://example.com/news/story").unwrap()));
        assert!(!c.matches_url(&Url::parse("https://example.com/newsletter").unwrap()));
        assert!(!c.matches_url(&Url::parse("https://example.org/news").unwrap()));
    }

    #[test]
    fn test_matches_url_secure_requires_https() {
        let c = cookie("example.com", "/", true, None);
        assert!(c.matches_url(&Url::parse("https://example.com/").unwrap()));
        assert!(!c.matches_url(&Url::parse("http://example.com/").unwrap()));
    }

    #[test]
    fn test_expiry_to_millis() {
        assert_eq!(expiry_to_millis(0.0), None);
        assert_eq!(expiry_to_millis(-1.0), None);
        assert_eq!(expiry_to_millis(1_700_000_000.5), Some(1_700_000_000_500));
        assert_eq!(expiry_to_millis(1_700_000_000_000.0), Some(1_700_000_000_000));
    }

    #[test]
    fn test_parse_cookies_detects_format() {
        let json = r#"[{"name":"a","value":"1","domain":".x.com"}]"#;
        assert_eq!(parse_cookies(json).unwrap().len(), 1);

        let netscape = ".x.com\tTRUE\t/\tFALSE\t0\ta\t1\n";
        assert_eq!(parse_cookies(netscape).unwrap().len(), 1);

        assert!(matches!(parse_cookies("# only comments\n"), Err(CookieError::Empty)));
    }

    #[test]
    fn test_detect_expired_cookies_returns_only_expired() {
        let now = 1_700_000_000_000;
        let mut stale = cookie(".a.com", "/", false, Some(now - 60_000));
        stale.name = "stale".to_string();
        let cookies = vec![
            cookie(".a.com", "/", false, Some(now + 60_000)),
            stale.clone(),
            cookie(".a.com", "/", false, None),
        ];

        let expired = detect_expired_cookies_at(&cookies, now);
        assert_eq!(expired, vec![stale]);
    }

    #[test]
    fn test_same_site_parse() {
        assert_eq!(SameSite::parse("Lax"), Some(SameSite::Lax));
        assert_eq!(SameSite::parse("no_restriction"), Some(SameSite::None));
        assert_eq!(SameSite::parse("unspecified"), None);
    }
}
