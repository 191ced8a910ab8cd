use super::{expiry_to_millis, Cookie, CookieError};

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Parses Netscape `cookies.txt` content
///
/// Each line is `domain \t include-subdomains \t path \t secure \t expiration
/// \t name \t value`. Blank lines and `#` comments are skipped, except for the
/// `#HttpOnly_` prefix curl writes in front of HttpOnly cookies.
pub fn parse_netscape_cookies(content: &str) -> Result<Vec<Cookie>, CookieError> {
    let mut cookies = Vec::new();

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            continue;
        }

        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None if line.starts_with('#') => continue,
            None => (line, false),
        };

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            return Err(CookieError::Malformed {
                line: line_number,
                reason: format!("expected 7 tab-separated fields, found {}", fields.len()),
            });
        }

        let expiration: f64 = fields[4].trim().parse().map_err(|_| CookieError::Malformed {
            line: line_number,
            reason: format!("invalid expiration '{}'", fields[4]),
        })?;

        cookies.push(Cookie {
            domain: fields[0].to_string(),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expires: expiry_to_millis(expiration),
            name: fields[5].to_string(),
            // Values may themselves contain tabs
            value: fields[6..].join("\t"),
            http_only,
            same_site: None,
        });
    }

    Ok(cookies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_netscape_lines() {
        let content = "# Netscape HTTP Cookie File\n\n\
            .example.com\tTRUE\t/\tTRUE\t1893456000\tsid\txyz\n\
            #HttpOnly_news.example.com\tFALSE\t/account\tFALSE\t0\ttoken\tt1\n";

        let cookies = parse_netscape_cookies(content).unwrap();
        assert_eq!(cookies.len(), 2);

        assert_eq!(cookies[0].domain, ".example.com");
        assert_eq!(cookies[0].name, "sid");
        assert_eq!(cookies[0].value, "xyz");
        assert!(cookies[0].secure);
        assert!(!cookies[0].http_only);
        assert_eq!(cookies[0].expires, Some(1_893_456_000_000));

        assert_eq!(cookies[1].domain, "news.example.com");
        assert_eq!(cookies[1].path, "/account");
        assert!(cookies[1].http_only);
        assert_eq!(cookies[1].expires, None);
    }

    #[test]
    fn test_parse_netscape_malformed() {
        let err = parse_netscape_cookies("example.com\tTRUE\t/\n").unwrap_err();
        assert!(matches!(err, CookieError::Malformed { line: 1, .. }));

        let err =
            parse_netscape_cookies("example.com\tTRUE\t/\tFALSE\tsoon\ta\tb\n").unwrap_err();
        assert!(matches!(err, CookieError::Malformed { line: 1, .. }));
    }
}
