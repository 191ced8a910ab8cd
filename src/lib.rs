//! Article-Digest: resilient article extraction and summarization
//!
//! This crate renders authenticated article pages, pulls out their text and
//! images, and summarizes them with a local LLM server. Every external
//! boundary (page rendering, image CDNs, the LLM server) may fail; failures
//! are classified by the [`recovery`] engine and either absorbed into a
//! degraded result or surfaced with remediation suggestions.

pub mod browser;
pub mod config;
pub mod cookies;
pub mod images;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod recovery;
pub mod summarize;
pub mod url;

use thiserror::Error;

/// Main error type for Article-Digest operations
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cookie error: {0}")]
    Cookies(#[from] cookies::CookieError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("Page load error: {0}")]
    Load(#[from] loader::LoadError),

    #[error("LLM error: {0}")]
    Llm(#[from] summarize::LlmError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("{0}")]
    Pipeline(#[from] recovery::PipelineError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Article-Digest operations
pub type Result<T> = std::result::Result<T, DigestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use cookies::Cookie;
pub use pipeline::{PipelineCoordinator, PipelineResult};
pub use recovery::{ErrorCode, ErrorRecoveryEngine, PipelineError, RecoveryAttemptCounter};
