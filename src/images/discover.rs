//! Image discovery from rendered HTML

use super::RemoteImage;
use crate::url::resolve_reference;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Finds the images referenced by a page
///
/// The `og:image` meta tag (if any) comes first and is flagged as the
/// feature image; `<img>` elements follow in document order. Lazy-loaded
/// images are picked up through `data-src` when `src` is missing or inline.
///
/// # Arguments
///
/// * `html` - Rendered document
/// * `base_url` - URL the document was loaded from, for relative references
///
/// # Returns
///
/// Absolute http(s) image references, without duplicates and without
/// `data:` URIs
pub fn discover_images(html: &str, base_url: &Url) -> Vec<RemoteImage> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    if let Ok(selector) = Selector::parse(r#"meta[property="og:image"], meta[name="og:image"]"#) {
        let feature = document
            .select(&selector)
            .filter_map(|meta| meta.value().attr("content"))
            .find_map(|content| resolve_reference(content.trim(), base_url));

        if let Some(url) = feature {
            seen.insert(url.to_string());
            images.push(RemoteImage {
                src: url.to_string(),
                alt: None,
                title: None,
                srcset: None,
                is_feature_image: true,
            });
        }
    }

    let Ok(selector) = Selector::parse("img") else {
        return images;
    };

    for element in document.select(&selector) {
        let attrs = element.value();
        let resolved = ["src", "data-src"]
            .iter()
            .filter_map(|name| attrs.attr(name))
            .find_map(|value| resolve_reference(value.trim(), base_url));

        let Some(url) = resolved else {
            continue;
        };

        if !seen.insert(url.to_string()) {
            continue;
        }

        images.push(RemoteImage {
            src: url.to_string(),
            alt: non_empty(attrs.attr("alt")),
            title: non_empty(attrs.attr("title")),
            srcset: non_empty(attrs.attr("srcset")),
            is_feature_image: false,
        });
    }

    tracing::debug!("Discovered {} images on {}", images.len(), base_url);
    images
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
