//! Text and metadata extraction from rendered HTML
//!
//! - Title from `og:title`, falling back to `<title>`
//! - Article text from `<article>`, then `<main>`, then `<body>`
//! - Script, style and noscript content is never included

use scraper::{ElementRef, Html, Node, Selector};

const CONTENT_ROOTS: &[&str] = &["article", "main", "body"];
const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "figcaption",
];
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Extracted information from an article page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    pub title: Option<String>,

    /// Readable text, paragraphs separated by blank lines
    pub text: String,
}

/// Parses HTML and extracts the title and readable text
pub fn extract_content(html: &str) -> ExtractedContent {
    let document = Html::parse_document(html);

    ExtractedContent {
        title: extract_title(&document),
        text: extract_text(&document),
    }
}

/// Visible text of the whole `<body>`, whitespace-collapsed
pub fn extract_body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("body") else {
        return String::new();
    };

    document
        .select(&selector)
        .next()
        .map(|body| collapse_whitespace(&visible_text(body)))
        .unwrap_or_default()
}

fn extract_title(document: &Html) -> Option<String> {
    if let Ok(og_selector) = Selector::parse("meta[property='og:title'][content]") {
        let og = document
            .select(&og_selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if og.is_some() {
            return og;
        }
    }

    let title_selector = Selector::parse("title").ok()?;
    document
        .select(&title_selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn extract_text(document: &Html) -> String {
    for root_tag in CONTENT_ROOTS {
        let Ok(selector) = Selector::parse(root_tag) else {
            continue;
        };
        let Some(root) = document.select(&selector).next() else {
            continue;
        };

        let paragraphs = block_paragraphs(root);
        let text = if paragraphs.is_empty() {
            collapse_whitespace(&visible_text(root))
        } else {
            paragraphs.join("\n\n")
        };

        if !text.is_empty() {
            return text;
        }
    }

    String::new()
}

/// Text of outermost block elements under `root`
fn block_paragraphs(root: ElementRef<'_>) -> Vec<String> {
    let mut paragraphs = Vec::new();

    for node in root.descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        if !BLOCK_TAGS.contains(&element.value().name()) {
            continue;
        }

        // Nested blocks (li > p) are covered by their outer block
        let nested = node
            .ancestors()
            .take_while(|a| a.id() != root.id())
            .filter_map(|a| a.value().as_element())
            .any(|e| BLOCK_TAGS.contains(&e.name()) || SKIPPED_TAGS.contains(&e.name()));
        if nested {
            continue;
        }

        let text = collapse_whitespace(&visible_text(element));
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    paragraphs
}

/// Concatenates text nodes, skipping script-like subtrees
fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();

    for node in root.descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node
                .ancestors()
                .filter_map(|a| a.value().as_element())
                .any(|e| SKIPPED_TAGS.contains(&e.name()));
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
    }

    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
