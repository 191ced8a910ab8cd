//! Output module for writing digested articles
//!
//! Each article is written to `<root>/<slug>/`:
//! - `index.md`: title, metadata, summary, text and image links
//! - `metadata.json`: the full pipeline result
//! - `images/`: copies of the acquired images

mod markdown;

pub use markdown::{format_article_markdown, IMAGES_DIR};

use crate::pipeline::PipelineResult;
use crate::url::slug_for_url;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Output-specific errors
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot derive an output folder from '{0}'")]
    InvalidUrl(String),
}

impl OutputError {
    /// Path involved in the failure, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type for output operations
pub type OutputResult<T> = std::result::Result<T, OutputError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Folder name for a result, derived from its final URL
pub fn article_slug(result: &PipelineResult) -> OutputResult<String> {
    Url::parse(&result.final_url)
        .or_else(|_| Url::parse(&result.url))
        .map(|url| slug_for_url(&url))
        .map_err(|_| OutputError::InvalidUrl(result.final_url.clone()))
}

/// Writes one article under `output_root`
///
/// Images are copied from their acquisition location; the originals are
/// left in place (see [`discard_staging`]).
///
/// # Arguments
///
/// * `result` - The pipeline result to write
/// * `output_root` - Root output directory
///
/// # Returns
///
/// * `Ok(PathBuf)` - Path of the written `index.md`
/// * `Err(OutputError)` - Failed to write the article
pub async fn write_article(result: &PipelineResult, output_root: &Path) -> OutputResult<PathBuf> {
    let article_dir = output_root.join(article_slug(result)?);
    let images_dir = article_dir.join(IMAGES_DIR);

    tokio::fs::create_dir_all(&article_dir)
        .await
        .map_err(io_error(&article_dir))?;

    if !result.images.is_empty() {
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(io_error(&images_dir))?;
    }

    for image in &result.images {
        let target = images_dir.join(&image.relative_path);
        tokio::fs::copy(&image.local_path, &target)
            .await
            .map_err(io_error(&target))?;
    }

    let index = article_dir.join("index.md");
    tokio::fs::write(&index, format_article_markdown(result))
        .await
        .map_err(io_error(&index))?;

    let metadata = article_dir.join("metadata.json");
    let json = serde_json::to_vec_pretty(result)?;
    tokio::fs::write(&metadata, json)
        .await
        .map_err(io_error(&metadata))?;

    tracing::info!("Wrote {}", index.display());
    Ok(index)
}

/// Removes the acquisition directory of a result once it has been written
pub async fn discard_staging(result: &PipelineResult) -> OutputResult<()> {
    let Some(dir) = &result.image_dir else {
        return Ok(());
    };

    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OutputError::Io {
            path: dir.clone(),
            source: e,
        }),
    }
}
