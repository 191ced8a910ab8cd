//! Conversion of arbitrary failures into [`PipelineError`]

use super::error::{ErrorContext, PipelineError, Stage};
use crate::browser::BrowserError;
use crate::cookies::CookieError;
use crate::images::ImageError;
use crate::loader::LoadError;
use crate::output::OutputError;
use crate::summarize::LlmError;
use crate::{ConfigError, DigestError};
use std::error::Error;

/// Classifies any error raised during a pipeline run
///
/// Known crate error types are mapped variant by variant. Foreign errors
/// (`reqwest`, `std::io`) and bare messages fall back to the stage in
/// `context` and to message patterns. Anything unrecognized becomes
/// [`ErrorCode::Unknown`](super::ErrorCode::Unknown) with `recoverable = true`.
pub fn normalize(error: &(dyn Error + 'static), context: ErrorContext) -> PipelineError {
    if let Some(e) = error.downcast_ref::<PipelineError>() {
        return e.clone();
    }
    if let Some(e) = error.downcast_ref::<DigestError>() {
        return from_digest(e, context);
    }
    if let Some(e) = error.downcast_ref::<LoadError>() {
        return from_load(e, context);
    }
    if let Some(e) = error.downcast_ref::<BrowserError>() {
        return from_browser(e, context);
    }
    if let Some(e) = error.downcast_ref::<LlmError>() {
        return from_llm(e, context);
    }
    if let Some(e) = error.downcast_ref::<ImageError>() {
        return from_image(e, context);
    }
    if let Some(e) = error.downcast_ref::<ConfigError>() {
        return from_config(e, context);
    }
    if let Some(e) = error.downcast_ref::<CookieError>() {
        return from_cookies(e, context);
    }
    if let Some(e) = error.downcast_ref::<OutputError>() {
        return from_output(e, context);
    }
    if let Some(e) = error.downcast_ref::<std::io::Error>() {
        return from_io(e, "io", context);
    }
    if let Some(e) = error.downcast_ref::<reqwest::Error>() {
        return from_reqwest(e, context);
    }

    from_message(&error.to_string(), context)
}

fn from_digest(error: &DigestError, context: ErrorContext) -> PipelineError {
    match error {
        DigestError::Config(e) => from_config(e, context),
        DigestError::Cookies(e) => from_cookies(e, context),
        DigestError::Browser(e) => from_browser(e, context),
        DigestError::Load(e) => from_load(e, context),
        DigestError::Llm(e) => from_llm(e, context),
        DigestError::Output(e) => from_output(e, context),
        DigestError::Pipeline(e) => e.clone(),
        DigestError::Http(e) => from_reqwest(e, context),
        DigestError::UrlParse(e) => PipelineError::config_validation(Some("url"), &e.to_string(), context),
        DigestError::Io(e) => from_io(e, "io", context),
    }
}

fn from_load(error: &LoadError, context: ErrorContext) -> PipelineError {
    match error {
        LoadError::Timeout { url, timeout_ms, .. } => {
            PipelineError::network_timeout(url, *timeout_ms, context)
        }
        LoadError::Failed { .. } => PipelineError::unknown(error.to_string(), context),
        LoadError::Browser(e) => from_browser(e, context),
    }
}

fn from_browser(error: &BrowserError, context: ErrorContext) -> PipelineError {
    match error {
        BrowserError::Timeout { url, timeout_ms } => {
            PipelineError::network_timeout(url, *timeout_ms, context)
        }
        BrowserError::SelectorTimeout { timeout_ms, .. } => {
            let url = context.url.clone().unwrap_or_default();
            PipelineError::network_timeout(&url, *timeout_ms, context)
        }
        BrowserError::InvalidSelector(selector) => PipelineError::config_validation(
            Some("browser.wait-for-selector"),
            &format!("invalid selector '{}'", selector),
            context,
        ),
        _ => PipelineError::unknown(error.to_string(), context),
    }
}

fn from_llm(error: &LlmError, context: ErrorContext) -> PipelineError {
    match error {
        LlmError::Unreachable { endpoint, message } => {
            PipelineError::llm_unreachable(endpoint, message, context)
        }
        LlmError::Timeout {
            endpoint,
            timeout_ms,
        } => PipelineError::network_timeout(endpoint, *timeout_ms, context),
        LlmError::ModelNotFound { model, available } => {
            PipelineError::model_not_found(model, available.clone(), context)
        }
        LlmError::InsufficientMemory { model, message } => {
            PipelineError::insufficient_memory(model, message, context)
        }
        LlmError::NoModelsAvailable => {
            let requested = context.model.clone().unwrap_or_default();
            PipelineError::model_not_found(&requested, Vec::new(), context)
        }
        LlmError::AllModelsFailed {
            last: Some(last), ..
        } => from_llm(last, context),
        LlmError::AllModelsFailed {
            attempted,
            last: None,
        } => {
            let requested = context
                .model
                .clone()
                .or_else(|| attempted.first().cloned())
                .unwrap_or_default();
            PipelineError::model_not_found(&requested, Vec::new(), context)
        }
        LlmError::Http { .. } | LlmError::InvalidResponse(_) => {
            PipelineError::unknown(error.to_string(), context)
        }
    }
}

fn from_image(error: &ImageError, context: ErrorContext) -> PipelineError {
    let src = context.image_src.clone().unwrap_or_default();
    match error {
        ImageError::Io(e) => from_io(e, "image write", context),
        _ => PipelineError::image_download_failed(&src, error.status(), &error.to_string(), context),
    }
}

fn from_config(error: &ConfigError, context: ErrorContext) -> PipelineError {
    match error {
        ConfigError::Io(e) => from_io(e, "config read", context),
        ConfigError::Validation(message) | ConfigError::InvalidUrl(message) => {
            PipelineError::config_validation(config_field(message), message, context)
        }
        ConfigError::Parse(e) => PipelineError::config_validation(None, &e.to_string(), context),
    }
}

fn from_cookies(error: &CookieError, context: ErrorContext) -> PipelineError {
    match error {
        CookieError::Io(e) => from_io(e, "cookie file read", context),
        _ => PipelineError::config_validation(Some("cookies"), &error.to_string(), context),
    }
}

fn from_output(error: &OutputError, context: ErrorContext) -> PipelineError {
    let path = error.path().map(|p| p.to_path_buf()).or_else(|| context.path.clone());
    PipelineError::file_system(path, "output", &error.to_string(), context)
}

fn from_io(error: &std::io::Error, operation: &str, context: ErrorContext) -> PipelineError {
    if error.kind() == std::io::ErrorKind::TimedOut {
        let url = context.url.clone().unwrap_or_default();
        return PipelineError::network_timeout(&url, 0, context);
    }
    let path = context.path.clone();
    PipelineError::file_system(path, operation, &error.to_string(), context)
}

fn from_reqwest(error: &reqwest::Error, context: ErrorContext) -> PipelineError {
    let url = error
        .url()
        .map(|u| u.to_string())
        .or_else(|| context.url.clone())
        .unwrap_or_default();

    match context.stage {
        Some(Stage::Summarize) if error.is_connect() => {
            PipelineError::llm_unreachable(&url, &error.to_string(), context)
        }
        Some(Stage::Images) => {
            let src = context.image_src.clone().unwrap_or(url);
            let status = error.status().map(|s| s.as_u16());
            PipelineError::image_download_failed(&src, status, &error.to_string(), context)
        }
        _ if error.is_timeout() => PipelineError::network_timeout(&url, 0, context),
        _ => PipelineError::unknown(error.to_string(), context),
    }
}

fn from_message(message: &str, context: ErrorContext) -> PipelineError {
    let lower = message.to_lowercase();
    let url = context.url.clone().unwrap_or_default();

    if lower.contains("timed out") || lower.contains("timeout") {
        return PipelineError::network_timeout(&url, 0, context);
    }

    if context.stage == Some(Stage::Summarize)
        && (lower.contains("connection refused") || lower.contains("econnrefused"))
    {
        return PipelineError::llm_unreachable(&url, message, context);
    }

    PipelineError::unknown(message, context)
}

/// Leading `section.field` token of a validation message
fn config_field(message: &str) -> Option<&str> {
    message
        .split_whitespace()
        .next()
        .filter(|token| token.contains('.') && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{ErrorCode, ErrorKind};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Opaque(String);

    #[test]
    fn test_llm_errors() {
        let unreachable = LlmError::Unreachable {
            endpoint: "http://localhost:11434/api/tags".to_string(),
            message: "connection refused".to_string(),
        };
        let error = normalize(&unreachable, ErrorContext::at(Stage::Summarize));
        assert_eq!(error.code(), ErrorCode::LlmServerUnreachable);
        assert!(error.is_recoverable());

        let missing = LlmError::ModelNotFound {
            model: "llama3.1".to_string(),
            available: vec!["mistral".to_string()],
        };
        let error = normalize(&missing, ErrorContext::default());
        assert_eq!(
            error.kind(),
            &ErrorKind::ModelNotFound {
                requested: "llama3.1".to_string(),
                available: vec!["mistral".to_string()]
            }
        );
    }

    #[test]
    fn test_all_models_failed_unwraps_last() {
        let error = LlmError::AllModelsFailed {
            attempted: vec!["a".to_string()],
            last: Some(Box::new(LlmError::InsufficientMemory {
                model: "a".to_string(),
                message: "needs 12 GiB".to_string(),
            })),
        };
        assert_eq!(
            normalize(&error, ErrorContext::default()).code(),
            ErrorCode::InsufficientMemory
        );

        let none_installed = LlmError::AllModelsFailed {
            attempted: vec![],
            last: None,
        };
        assert_eq!(
            normalize(&none_installed, ErrorContext::default().model("llama3.1")).code(),
            ErrorCode::ModelNotFound
        );
    }

    #[test]
    fn test_load_timeout_is_network_timeout() {
        let error = LoadError::Timeout {
            url: "https://a.com/x".to_string(),
            attempts: 3,
            timeout_ms: 30_000,
        };
        let normalized = normalize(&error, ErrorContext::at(Stage::Load));
        assert_eq!(
            normalized.kind(),
            &ErrorKind::NetworkTimeout {
                url: "https://a.com/x".to_string(),
                timeout_ms: 30_000
            }
        );
    }

    #[test]
    fn test_image_error_uses_context_src() {
        let error = ImageError::Http {
            src: "https://cdn/a.png".to_string(),
            status: 503,
        };
        let normalized = normalize(&error, ErrorContext::at(Stage::Images).image_src("https://cdn/a.png"));
        assert_eq!(
            normalized.kind(),
            &ErrorKind::ImageDownloadFailed {
                src: "https://cdn/a.png".to_string(),
                status: Some(503)
            }
        );
    }

    #[test]
    fn test_config_validation_field_extracted() {
        let error = ConfigError::Validation("llm.temperature must be between 0.0 and 2.0, got 3".to_string());
        let normalized = normalize(&error, ErrorContext::at(Stage::Config));
        assert_eq!(
            normalized.kind(),
            &ErrorKind::ConfigValidation {
                field: Some("llm.temperature".to_string())
            }
        );
        assert!(!normalized.is_recoverable());
    }

    #[test]
    fn test_wrapped_in_digest_error() {
        let error = DigestError::from(LlmError::Timeout {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            timeout_ms: 120_000,
        });
        assert_eq!(
            normalize(&error, ErrorContext::default()).code(),
            ErrorCode::NetworkTimeout
        );
    }

    #[test]
    fn test_io_error_is_file_system() {
        let error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let normalized = normalize(&error, ErrorContext::at(Stage::Output).path("/ro/out"));
        assert_eq!(normalized.code(), ErrorCode::FileSystemError);
    }

    #[test]
    fn test_unknown_shapes() {
        let normalized = normalize(&Opaque("something odd".to_string()), ErrorContext::default());
        assert_eq!(normalized.code(), ErrorCode::Unknown);
        assert!(normalized.is_recoverable());
        assert_eq!(normalized.message(), "something odd");
    }

    #[test]
    fn test_message_patterns() {
        let refused = Opaque("connect ECONNREFUSED 127.0.0.1:11434".to_string());
        assert_eq!(
            normalize(&refused, ErrorContext::at(Stage::Summarize)).code(),
            ErrorCode::LlmServerUnreachable
        );

        let timed_out = Opaque("operation timed out".to_string());
        assert_eq!(
            normalize(&timed_out, ErrorContext::default()).code(),
            ErrorCode::NetworkTimeout
        );
    }

    #[test]
    fn test_pipeline_error_passes_through() {
        let original = PipelineError::unknown("x", ErrorContext::default());
        let normalized = normalize(&original, ErrorContext::at(Stage::Images));
        assert_eq!(normalized.timestamp(), original.timestamp());
    }
}
