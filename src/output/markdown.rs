//! Markdown rendering of pipeline results

use crate::images::LocalImage;
use crate::pipeline::PipelineResult;

/// Directory (relative to the article folder) holding copied images
pub const IMAGES_DIR: &str = "images";

/// Formats a pipeline result as a markdown document
///
/// # Arguments
///
/// * `result` - The pipeline result
///
/// # Returns
///
/// A formatted markdown string with metadata, summary, article text and
/// image links pointing into [`IMAGES_DIR`]
pub fn format_article_markdown(result: &PipelineResult) -> String {
    let mut md = String::new();

    let title = result.title.as_deref().unwrap_or("Untitled article");
    md.push_str(&format!("# {}\n\n", title.trim()));

    md.push_str(&format!("- **Source**: <{}>\n", result.final_url));
    if result.final_url != result.url {
        md.push_str(&format!("- **Requested**: <{}>\n", result.url));
    }
    md.push_str(&format!(
        "- **Fetched**: {}\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M UTC")
    ));
    md.push_str(&format!("- **Estimated Tokens**: {}\n", result.estimated_tokens));
    if result.paywall.is_gated() {
        md.push_str(&format!("- **Paywall**: {}\n", result.paywall));
    }
    if let Some(summary) = &result.summary {
        md.push_str(&format!("- **Model**: {}\n", summary.model));
    }
    md.push('\n');

    if let Some(feature) = result.images.iter().find(|i| i.remote.is_feature_image) {
        md.push_str(&image_line(feature));
        md.push_str("\n\n");
    }

    if let Some(summary) = &result.summary {
        md.push_str("## Summary\n\n");
        md.push_str(summary.summary.trim());
        md.push_str("\n\n");
    }

    md.push_str("## Article\n\n");
    if result.text.trim().is_empty() {
        md.push_str("_No article text could be extracted._\n\n");
    } else {
        md.push_str(result.text.trim());
        md.push_str("\n\n");
    }

    let gallery: Vec<_> = result
        .images
        .iter()
        .filter(|i| !i.remote.is_feature_image)
        .collect();
    if !gallery.is_empty() {
        md.push_str("## Images\n\n");
        for image in gallery {
            md.push_str(&image_line(image));
            md.push_str("\n\n");
        }
    }

    if result.images_dropped > 0 || !result.suppressed_errors.is_empty() {
        md.push_str("## Notes\n\n");
        if result.images_dropped > 0 {
            md.push_str(&format!(
                "- {} image(s) could not be downloaded\n",
                result.images_dropped
            ));
        }
        for (code, count) in result.suppressed_counts() {
            md.push_str(&format!("- {} × {}\n", count, code));
        }
        md.push('\n');
    }

    md
}

fn image_line(image: &LocalImage) -> String {
    let alt = image
        .remote
        .alt
        .as_deref()
        .or(image.remote.title.as_deref())
        .unwrap_or("")
        .replace(['[', ']'], "");
    format!("![{}]({}/{})", alt, IMAGES_DIR, image.relative_path)
}
