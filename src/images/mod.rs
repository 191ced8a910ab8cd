//! Image acquisition
//!
//! This module handles everything between "the page references an image"
//! and "the image is on disk":
//! - Discovery of image references in rendered HTML ([`discover_images`])
//! - Batched concurrent downloads bounded by `max_concurrent`
//! - SHA-256 content hashing of the downloaded bytes
//! - Per-run deduplication by hash, preserving input order
//! - Optional resize and recompression ([`optimize_image`])
//!
//! Individual image failures never fail the acquisition as a whole; they are
//! logged and reported in [`AcquisitionReport::failures`].

mod discover;
mod optimize;

pub use discover::discover_images;
pub use optimize::{optimize_image, OptimizeSettings, OptimizedImage};

use crate::config::ImageConfig;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;

const HASH_READ_BUFFER: usize = 64 * 1024;
const PARTIAL_DIR: &str = ".partial";

/// Errors for a single image
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("HTTP {status} for {src}")]
    Http { src: String, status: u16 },

    #[error("Download of {src} timed out")]
    Timeout { src: String },

    #[error("Network error for {src}: {message}")]
    Network { src: String, message: String },

    #[error("Image {src} is {bytes} bytes, over the {limit} byte limit")]
    TooLarge { src: String, bytes: u64, limit: u64 },

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Image worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImageError {
    /// HTTP status for download failures, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// An image reference found on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteImage {
    pub src: String,
    pub alt: Option<String>,
    pub title: Option<String>,
    pub srcset: Option<String>,
    pub is_feature_image: bool,
}

/// A downloaded, hashed and (optionally) optimized image
#[derive(Debug, Clone, Serialize)]
pub struct LocalImage {
    pub remote: RemoteImage,
    /// Absolute location of the stored file
    pub local_path: PathBuf,
    /// Location relative to the acquisition output directory
    pub relative_path: String,
    /// Hex SHA-256 of the downloaded bytes
    pub hash: String,
    pub optimized: bool,
    pub width: u32,
    pub height: u32,
}

/// An image that was dropped
#[derive(Debug)]
pub struct ImageFailure {
    pub image: RemoteImage,
    pub error: ImageError,
}

/// Outcome of [`ImageAcquisition::acquire`]
#[derive(Debug, Default)]
pub struct AcquisitionReport {
    /// Kept images, in input order
    pub images: Vec<LocalImage>,
    pub failures: Vec<ImageFailure>,
    /// Images discarded because an earlier image had the same hash
    pub duplicates: usize,
    /// Image sources per batch, in execution order
    pub batches: Vec<Vec<String>>,
}

impl AcquisitionReport {
    /// Number of images that failed and were left out
    pub fn dropped(&self) -> usize {
        self.failures.len()
    }
}

/// Settings for image acquisition
#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    pub timeout: Duration,
    pub max_bytes: u64,
    pub optimize: OptimizeSettings,
}

impl From<&ImageConfig> for AcquisitionOptions {
    fn from(config: &ImageConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_bytes: config.max_bytes,
            optimize: OptimizeSettings {
                max_width: config.max_width,
                quality: config.quality,
                enabled: config.optimize,
            },
        }
    }
}

/// Downloaded and processed image awaiting the dedup decision
struct Processed {
    hash: String,
    image: OptimizedImage,
}

/// Downloads page images with bounded concurrency
#[derive(Debug, Clone)]
pub struct ImageAcquisition {
    client: Client,
    options: AcquisitionOptions,
}

impl ImageAcquisition {
    pub fn new(client: Client, options: AcquisitionOptions) -> Self {
        Self { client, options }
    }

    /// Builds an acquisition with its own HTTP client
    pub fn from_config(config: &ImageConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self::new(client, AcquisitionOptions::from(config)))
    }

    /// Downloads, hashes, deduplicates and stores `images` under `output_dir`
    ///
    /// Images are processed in batches of `max_concurrent`. Each batch runs
    /// its downloads concurrently and completes fully before the next one
    /// starts. Kept images keep their input order; an image whose hash
    /// matches an earlier kept image is discarded.
    ///
    /// # Arguments
    ///
    /// * `images` - Image references in discovery order
    /// * `output_dir` - Directory receiving `<hash>.<ext>` files
    /// * `max_concurrent` - Batch size (values below 1 are treated as 1)
    pub async fn acquire(
        &self,
        images: &[RemoteImage],
        output_dir: &Path,
        max_concurrent: usize,
    ) -> AcquisitionReport {
        let mut report = AcquisitionReport::default();
        if images.is_empty() {
            return report;
        }

        let partial_dir = output_dir.join(PARTIAL_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&partial_dir).await {
            tracing::warn!(
                "Cannot create image directory {}: {}",
                partial_dir.display(),
                e
            );
            let message = e.to_string();
            report.failures = images
                .iter()
                .map(|image| ImageFailure {
                    image: image.clone(),
                    error: ImageError::Io(std::io::Error::new(e.kind(), message.clone())),
                })
                .collect();
            return report;
        }

        let batch_size = max_concurrent.max(1);
        let mut seen_hashes = HashSet::new();

        for (batch_index, batch) in images.chunks(batch_size).enumerate() {
            tracing::debug!("Image batch {} ({} images)", batch_index + 1, batch.len());
            report
                .batches
                .push(batch.iter().map(|image| image.src.clone()).collect());

            let outcomes = join_all(batch.iter().enumerate().map(|(offset, image)| {
                let partial = partial_dir.join(format!("{}.part", batch_index * batch_size + offset));
                self.process(image, partial)
            }))
            .await;

            for (image, outcome) in batch.iter().zip(outcomes) {
                let processed = match outcome {
                    Ok(processed) => processed,
                    Err(error) => {
                        tracing::warn!("Dropping image {}: {}", image.src, error);
                        report.failures.push(ImageFailure {
                            image: image.clone(),
                            error,
                        });
                        continue;
                    }
                };

                if !seen_hashes.insert(processed.hash.clone()) {
                    tracing::debug!("Duplicate image {} ({})", image.src, &processed.hash[..16]);
                    report.duplicates += 1;
                    continue;
                }

                match store(image, processed, output_dir).await {
                    Ok(local) => report.images.push(local),
                    Err(error) => {
                        tracing::warn!("Dropping image {}: {}", image.src, error);
                        report.failures.push(ImageFailure {
                            image: image.clone(),
                            error,
                        });
                    }
                }
            }
        }

        let _ = tokio::fs::remove_dir_all(&partial_dir).await;

        tracing::info!(
            "Acquired {} images ({} duplicates, {} dropped) in {} batches",
            report.images.len(),
            report.duplicates,
            report.dropped(),
            report.batches.len()
        );

        report
    }

    /// Download → temp file → hash → optimize for one image
    async fn process(&self, image: &RemoteImage, partial: PathBuf) -> Result<Processed, ImageError> {
        let result = self.process_inner(image, &partial).await;
        let _ = tokio::fs::remove_file(&partial).await;
        result
    }

    async fn process_inner(&self, image: &RemoteImage, partial: &Path) -> Result<Processed, ImageError> {
        let raw = self.download(&image.src).await?;
        tokio::fs::write(partial, &raw).await?;

        let hash = hash_file(partial).await?;

        let settings = self.options.optimize;
        let optimized = tokio::task::spawn_blocking(move || optimize_image(&raw, settings))
            .await
            .map_err(|e| ImageError::Worker(e.to_string()))??;

        Ok(Processed {
            hash,
            image: optimized,
        })
    }

    async fn download(&self, src: &str) -> Result<Vec<u8>, ImageError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                ImageError::Timeout {
                    src: src.to_string(),
                }
            } else {
                ImageError::Network {
                    src: src.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(src)
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Http {
                src: src.to_string(),
                status: status.as_u16(),
            });
        }

        let limit = self.options.max_bytes;
        if let Some(length) = response.content_length() {
            if length > limit {
                return Err(ImageError::TooLarge {
                    src: src.to_string(),
                    bytes: length,
                    limit,
                });
            }
        }

        let bytes = response.bytes().await.map_err(classify)?;
        if bytes.len() as u64 > limit {
            return Err(ImageError::TooLarge {
                src: src.to_string(),
                bytes: bytes.len() as u64,
                limit,
            });
        }

        Ok(bytes.to_vec())
    }
}

/// Streams a file through SHA-256 and returns the hex digest
pub async fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_READ_BUFFER];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

async fn store(image: &RemoteImage, processed: Processed, output_dir: &Path) -> Result<LocalImage, ImageError> {
    let file_name = format!("{}.{}", &processed.hash[..16], processed.image.extension);
    let local_path = output_dir.join(&file_name);
    tokio::fs::write(&local_path, &processed.image.bytes).await?;

    Ok(LocalImage {
        remote: image.clone(),
        local_path,
        relative_path: file_name,
        hash: processed.hash,
        optimized: processed.image.optimized,
        width: processed.image.width,
        height: processed.image.height,
    })
}
