use super::{expiry_to_millis, Cookie, CookieError, SameSite};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCookie {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    http_only: bool,
    #[serde(default)]
    same_site: Option<String>,
    #[serde(default)]
    expiration_date: Option<f64>,
    #[serde(default)]
    expires: Option<f64>,
}

/// Parses a JSON array of cookies
///
/// Accepts `expirationDate` (browser extension exports) or `expires`
/// (automation tool exports), both in epoch seconds.
pub fn parse_json_cookies(content: &str) -> Result<Vec<Cookie>, CookieError> {
    let raw: Vec<RawCookie> = serde_json::from_str(content)?;

    Ok(raw
        .into_iter()
        .map(|c| Cookie {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path.unwrap_or_else(|| "/".to_string()),
            secure: c.secure,
            http_only: c.http_only,
            same_site: c.same_site.as_deref().and_then(SameSite::parse),
            expires: c.expiration_date.or(c.expires).and_then(expiry_to_millis),
        })
        .collect())
}
