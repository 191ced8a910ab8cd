//! Pipeline error taxonomy
//!
//! Every failure the pipeline observes is turned into a [`PipelineError`]:
//! a closed [`ErrorCode`], a kind-specific payload ([`ErrorKind`]), the
//! context it happened in and human-readable remediation steps. Errors are
//! immutable once built; `recoverable` is decided at construction.

use crate::cookies::Cookie;
use crate::loader::PaywallVerdict;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Closed set of pipeline error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PaywallDetected,
    CookieExpired,
    LlmServerUnreachable,
    ModelNotFound,
    InsufficientMemory,
    ImageDownloadFailed,
    NetworkTimeout,
    FileSystemError,
    ConfigValidationError,
    Unknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        Self::PaywallDetected,
        Self::CookieExpired,
        Self::LlmServerUnreachable,
        Self::ModelNotFound,
        Self::InsufficientMemory,
        Self::ImageDownloadFailed,
        Self::NetworkTimeout,
        Self::FileSystemError,
        Self::ConfigValidationError,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaywallDetected => "PAYWALL_DETECTED",
            Self::CookieExpired => "COOKIE_EXPIRED",
            Self::LlmServerUnreachable => "LLM_SERVER_UNREACHABLE",
            Self::ModelNotFound => "MODEL_NOT_FOUND",
            Self::InsufficientMemory => "INSUFFICIENT_MEMORY",
            Self::ImageDownloadFailed => "IMAGE_DOWNLOAD_FAILED",
            Self::NetworkTimeout => "NETWORK_TIMEOUT",
            Self::FileSystemError => "FILE_SYSTEM_ERROR",
            Self::ConfigValidationError => "CONFIG_VALIDATION_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Codes that always abort the run for a URL
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PaywallDetected | Self::CookieExpired | Self::ConfigValidationError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of a [`PipelineError`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    PaywallDetected {
        url: String,
        verdict: PaywallVerdict,
    },
    CookieExpired {
        cookies: Vec<String>,
    },
    LlmServerUnreachable {
        endpoint: String,
    },
    ModelNotFound {
        requested: String,
        available: Vec<String>,
    },
    InsufficientMemory {
        model: String,
    },
    ImageDownloadFailed {
        src: String,
        status: Option<u16>,
    },
    NetworkTimeout {
        url: String,
        timeout_ms: u64,
    },
    FileSystem {
        path: Option<PathBuf>,
        operation: String,
    },
    ConfigValidation {
        field: Option<String>,
    },
    Unknown,
}

impl ErrorKind {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PaywallDetected { .. } => ErrorCode::PaywallDetected,
            Self::CookieExpired { .. } => ErrorCode::CookieExpired,
            Self::LlmServerUnreachable { .. } => ErrorCode::LlmServerUnreachable,
            Self::ModelNotFound { .. } => ErrorCode::ModelNotFound,
            Self::InsufficientMemory { .. } => ErrorCode::InsufficientMemory,
            Self::ImageDownloadFailed { .. } => ErrorCode::ImageDownloadFailed,
            Self::NetworkTimeout { .. } => ErrorCode::NetworkTimeout,
            Self::FileSystem { .. } => ErrorCode::FileSystemError,
            Self::ConfigValidation { .. } => ErrorCode::ConfigValidationError,
            Self::Unknown => ErrorCode::Unknown,
        }
    }

    /// Remediation steps shown to the user
    fn default_suggestions(&self) -> Vec<String> {
        match self {
            Self::PaywallDetected { url, .. } => vec![
                format!("Log in to {} in your browser and export fresh cookies", url),
                "Check that your subscription is active".to_string(),
            ],
            Self::CookieExpired { cookies } => vec![
                format!("Refresh cookies: {} expired", cookies.join(", ")),
                "Log in to the site again before exporting cookies".to_string(),
            ],
            Self::LlmServerUnreachable { endpoint } => vec![
                "Start the LLM server (ollama serve)".to_string(),
                format!("Check that llm.base-url points at the server ({})", endpoint),
            ],
            Self::ModelNotFound {
                requested,
                available,
            } => {
                let mut steps = vec![format!("Pull the model: ollama pull {}", requested)];
                if !available.is_empty() {
                    steps.push(format!("Or use an installed model: {}", available.join(", ")));
                }
                steps
            }
            Self::InsufficientMemory { model } => vec![
                format!("Use a smaller model than {}", model),
                "Close other applications to free memory".to_string(),
            ],
            Self::ImageDownloadFailed { src, .. } => {
                vec![format!("Image {} was skipped; re-run later if it is needed", src)]
            }
            Self::NetworkTimeout { .. } => vec![
                "Check your network connection".to_string(),
                "Increase browser.timeout-ms".to_string(),
            ],
            Self::FileSystem { path, .. } => vec![
                match path {
                    Some(path) => format!("Check that {} exists and is writable", path.display()),
                    None => "Check that the output directory exists and is writable".to_string(),
                },
                "Check free disk space".to_string(),
            ],
            Self::ConfigValidation { field } => vec![match field {
                Some(field) => format!("Fix the value of {} in the configuration file", field),
                None => "Fix the configuration file".to_string(),
            }],
            Self::Unknown => vec!["Re-run with -v for more detail".to_string()],
        }
    }
}

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Cookies,
    Load,
    Paywall,
    Extract,
    Images,
    Summarize,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Cookies => "cookies",
            Self::Load => "load",
            Self::Paywall => "paywall",
            Self::Extract => "extract",
            Self::Images => "images",
            Self::Summarize => "summarize",
            Self::Output => "output",
        };
        f.write_str(name)
    }
}

/// Where an error happened
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    pub stage: Option<Stage>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub image_src: Option<String>,
    pub path: Option<PathBuf>,
}

impl ErrorContext {
    pub fn at(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn image_src(mut self, src: impl Into<String>) -> Self {
        self.image_src = Some(src.into());
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A classified pipeline failure
#[derive(Debug, Clone, Error, Serialize)]
#[error("[{}] {message}", .kind.code())]
pub struct PipelineError {
    kind: ErrorKind,
    message: String,
    context: ErrorContext,
    suggestions: Vec<String>,
    recoverable: bool,
    timestamp: DateTime<Utc>,
}

impl PipelineError {
    /// Builds an error whose recoverability follows its code
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        let recoverable = !kind.code().is_fatal();
        Self::with_recoverable(kind, message, context, recoverable)
    }

    /// Builds an error with an explicit recoverability
    pub fn with_recoverable(
        kind: ErrorKind,
        message: impl Into<String>,
        context: ErrorContext,
        recoverable: bool,
    ) -> Self {
        let suggestions = kind.default_suggestions();
        Self {
            kind,
            message: message.into(),
            context,
            suggestions,
            recoverable,
            timestamp: Utc::now(),
        }
    }

    pub fn paywall(url: &str, verdict: PaywallVerdict, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::PaywallDetected {
                url: url.to_string(),
                verdict,
            },
            format!("Paywall detected on {} ({})", url, verdict),
            context,
        )
    }

    /// Error for a set of expired cookies
    pub fn cookie_expired(expired: &[Cookie], context: ErrorContext) -> Self {
        let cookies: Vec<String> = expired.iter().map(|c| c.name.clone()).collect();
        let message = format!("{} cookie(s) expired: {}", cookies.len(), cookies.join(", "));
        Self::new(ErrorKind::CookieExpired { cookies }, message, context)
    }

    pub fn llm_unreachable(endpoint: &str, detail: &str, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::LlmServerUnreachable {
                endpoint: endpoint.to_string(),
            },
            format!("LLM server unreachable at {}: {}", endpoint, detail),
            context,
        )
    }

    pub fn model_not_found(requested: &str, available: Vec<String>, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::ModelNotFound {
                requested: requested.to_string(),
                available,
            },
            format!("Model '{}' is not installed", requested),
            context,
        )
    }

    pub fn insufficient_memory(model: &str, detail: &str, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::InsufficientMemory {
                model: model.to_string(),
            },
            format!("Not enough memory for model '{}': {}", model, detail),
            context,
        )
    }

    pub fn image_download_failed(src: &str, status: Option<u16>, detail: &str, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::ImageDownloadFailed {
                src: src.to_string(),
                status,
            },
            format!("Image download failed for {}: {}", src, detail),
            context,
        )
    }

    pub fn network_timeout(url: &str, timeout_ms: u64, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::NetworkTimeout {
                url: url.to_string(),
                timeout_ms,
            },
            format!("Timed out after {}ms: {}", timeout_ms, url),
            context,
        )
    }

    pub fn file_system(path: Option<PathBuf>, operation: &str, detail: &str, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::FileSystem {
                path,
                operation: operation.to_string(),
            },
            format!("File system error during {}: {}", operation, detail),
            context,
        )
    }

    pub fn config_validation(field: Option<&str>, detail: &str, context: ErrorContext) -> Self {
        Self::new(
            ErrorKind::ConfigValidation {
                field: field.map(String::from),
            },
            format!("Invalid configuration: {}", detail),
            context,
        )
    }

    pub fn unknown(detail: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::Unknown, detail, context)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> ErrorCode {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings_are_unique() {
        let mut codes: Vec<_> = ErrorCode::ALL.iter().map(|c| c.as_str()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 10);
    }

    #[test]
    fn test_default_recoverability_follows_code() {
        let ctx = ErrorContext::default;
        assert!(!PipelineError::paywall("https://a.com", PaywallVerdict::SoftOverlay, ctx()).is_recoverable());
        assert!(!PipelineError::config_validation(Some("llm.model"), "empty", ctx()).is_recoverable());
        assert!(PipelineError::network_timeout("https://a.com", 100, ctx()).is_recoverable());
        assert!(PipelineError::unknown("weird", ctx()).is_recoverable());
    }

    #[test]
    fn test_explicit_recoverability_is_kept() {
        let error = PipelineError::with_recoverable(
            ErrorKind::ImageDownloadFailed {
                src: "https://cdn/a.png".to_string(),
                status: Some(500),
            },
            "required hero image",
            ErrorContext::at(Stage::Images),
            false,
        );
        assert!(!error.is_recoverable());
        assert_eq!(error.code(), ErrorCode::ImageDownloadFailed);
    }

    #[test]
    fn test_display_includes_code() {
        let error = PipelineError::llm_unreachable(
            "http://localhost:11434",
            "connection refused",
            ErrorContext::at(Stage::Summarize),
        );
        let text = error.to_string();
        assert!(text.starts_with("[LLM_SERVER_UNREACHABLE]"));
        assert!(text.contains("connection refused"));
        assert!(error.suggestions().iter().any(|s| s.contains("ollama serve")));
    }

    #[test]
    fn test_model_not_found_suggests_installed() {
        let error = PipelineError::model_not_found(
            "llama3.1",
            vec!["mistral".to_string()],
            ErrorContext::at(Stage::Summarize).model("llama3.1"),
        );
        assert_eq!(error.suggestions().len(), 2);
        assert!(error.suggestions()[1].contains("mistral"));
        assert_eq!(error.context().model.as_deref(), Some("llama3.1"));
    }
}
