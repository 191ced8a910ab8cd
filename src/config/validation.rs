use crate::config::types::{
    BrowserConfig, Config, ImageConfig, LlmConfig, OutputConfig, RecoveryConfig,
};
use crate::recovery::MAX_RECOVERY_ATTEMPTS;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_browser_config(&config.browser)?;
    validate_image_config(&config.images)?;
    validate_llm_config(&config.llm)?;
    validate_recovery_config(&config.recovery)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if !config.backend.is_available() {
        return Err(ConfigError::Validation(format!(
            "browser.backend '{}' is not available in this build",
            config.backend
        )));
    }

    if config.max_retries < 1 || config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "browser.max-retries must be between 1 and 10, got {}",
            config.max_retries
        )));
    }

    if config.timeout_ms < 1_000 {
        return Err(ConfigError::Validation(format!(
            "browser.timeout-ms must be >= 1000ms, got {}ms",
            config.timeout_ms
        )));
    }

    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "browser.min-delay-ms ({}) must not exceed browser.max-delay-ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    if let Some(selector) = &config.wait_for_selector {
        if scraper::Selector::parse(selector).is_err() {
            return Err(ConfigError::Validation(format!(
                "browser.wait-for-selector is not a valid CSS selector: '{}'",
                selector
            )));
        }
    }

    Ok(())
}

fn validate_image_config(config: &ImageConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 50 {
        return Err(ConfigError::Validation(format!(
            "images.max-concurrent must be between 1 and 50, got {}",
            config.max_concurrent
        )));
    }

    if config.quality < 1 || config.quality > 100 {
        return Err(ConfigError::Validation(format!(
            "images.quality must be between 1 and 100, got {}",
            config.quality
        )));
    }

    if config.max_width < 16 {
        return Err(ConfigError::Validation(format!(
            "images.max-width must be >= 16, got {}",
            config.max_width
        )));
    }

    if config.max_bytes == 0 {
        return Err(ConfigError::Validation(
            "images.max-bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm_config(config: &LlmConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid llm.base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "llm.base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.enabled && config.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.model cannot be empty when summarization is enabled".to_string(),
        ));
    }

    if !matches!(config.length.as_str(), "short" | "medium" | "long") {
        return Err(ConfigError::Validation(format!(
            "llm.length must be one of short, medium, long; got '{}'",
            config.length
        )));
    }

    if !(0.0..=2.0).contains(&config.temperature) {
        return Err(ConfigError::Validation(format!(
            "llm.temperature must be between 0.0 and 2.0, got {}",
            config.temperature
        )));
    }

    Ok(())
}

fn validate_recovery_config(config: &RecoveryConfig) -> Result<(), ConfigError> {
    if !(1..=MAX_RECOVERY_ATTEMPTS).contains(&config.max_attempts) {
        return Err(ConfigError::Validation(format!(
            "recovery.max-attempts must be between 1 and {}, got {}",
            MAX_RECOVERY_ATTEMPTS, config.max_attempts
        )));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "output.directory cannot be empty".to_string(),
        ));
    }

    if config.batch_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "output.batch-concurrency must be >= 1, got {}",
            config.batch_concurrency
        )));
    }

    Ok(())
}
