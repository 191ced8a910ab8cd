use url::Url;

/// Resolves a reference found in HTML (`src`, `href`, `content`) to an
/// absolute http(s) URL
///
/// Returns None for empty references, `data:`/`javascript:`/`blob:` URIs and
/// anything that does not resolve to http or https.
pub fn resolve_reference(reference: &str, base_url: &Url) -> Option<Url> {
    let reference = reference.trim();

    if reference.is_empty() {
        return None;
    }

    let lower = reference.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("javascript:") || lower.starts_with("blob:")
    {
        return None;
    }

    let mut resolved = base_url.join(reference).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    resolved.set_fragment(None);
    Some(resolved)
}

/// Builds a filesystem-safe slug for an article URL
///
/// Uses the host plus the last non-empty path segment, lowercased, with every
/// run of non-alphanumeric characters collapsed to a single hyphen.
pub fn slug_for_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or("article").trim_start_matches("www.");
    let last_segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("index");

    let raw = format!("{}-{}", host, last_segment);
    let mut slug = String::with_capacity(raw.len());
    let mut last_was_dash = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }

    let slug = slug.trim_matches('-');
    slug.chars().take(120).collect()
}
