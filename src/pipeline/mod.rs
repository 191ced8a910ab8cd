//! Pipeline orchestration
//!
//! [`PipelineCoordinator`] sequences page loading, image acquisition and
//! summarization for one URL, routing every failure through the
//! [`ErrorRecoveryEngine`](crate::recovery::ErrorRecoveryEngine). Optional
//! stages degrade instead of failing; the run for a URL only fails on
//! errors that cannot be recovered.

mod coordinator;

pub use coordinator::{ChunkSink, PipelineCoordinator, PipelineOptions};

use crate::images::LocalImage;
use crate::loader::PaywallVerdict;
use crate::recovery::{ErrorCode, PipelineError};
use crate::summarize::SummarizationResult;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Best-effort outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// URL as requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub title: Option<String>,
    pub text: String,
    pub paywall: PaywallVerdict,
    pub images: Vec<LocalImage>,
    /// Images that failed and were left out
    pub images_dropped: usize,
    /// Directory holding the acquired image files until they are written out
    pub image_dir: Option<PathBuf>,
    pub summary: Option<SummarizationResult>,
    /// Token estimate for the extracted text
    pub estimated_tokens: usize,
    /// Recovered errors, in the order they happened
    pub suppressed_errors: Vec<PipelineError>,
    pub duration: Duration,
}

impl PipelineResult {
    /// Suppressed error counts per code, sorted by code
    pub fn suppressed_counts(&self) -> Vec<(ErrorCode, usize)> {
        let mut counts: Vec<(ErrorCode, usize)> = Vec::new();
        for error in &self.suppressed_errors {
            match counts.iter_mut().find(|(code, _)| *code == error.code()) {
                Some((_, count)) => *count += 1,
                None => counts.push((error.code(), 1)),
            }
        }
        counts.sort_by_key(|(code, _)| *code);
        counts
    }

    /// True if any optional stage was skipped or lost data
    pub fn is_degraded(&self) -> bool {
        !self.suppressed_errors.is_empty()
    }
}
