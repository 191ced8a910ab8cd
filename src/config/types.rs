use crate::browser::BackendKind;
use serde::Deserialize;

/// Main configuration structure for Article-Digest
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub images: ImageConfig,
    pub llm: LlmConfig,
    pub recovery: RecoveryConfig,
    pub output: OutputConfig,
}

/// Page loading behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BrowserConfig {
    /// Rendering backend: "http" (static fetch) or "chromium" (headless Chrome)
    pub backend: BackendKind,

    /// Chrome/Chromium binary for the chromium backend
    pub executable: Option<String>,

    /// Navigation timeout per attempt (milliseconds)
    pub timeout_ms: u64,

    /// Maximum load attempts per URL
    pub max_retries: u32,

    /// Enables UA rotation, header spoofing, request blocking and webdriver masking
    pub anti_detection: bool,

    /// Lower bound of the randomized delay between attempts (milliseconds)
    pub min_delay_ms: u64,

    /// Upper bound of the randomized delay between attempts (milliseconds)
    pub max_delay_ms: u64,

    /// CSS selector to wait for after navigation
    pub wait_for_selector: Option<String>,

    /// How long to wait for `wait_for_selector` (milliseconds)
    pub selector_timeout_ms: u64,

    /// Abort the run when a paywall is detected
    pub fail_on_paywall: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Http,
            executable: None,
            timeout_ms: 30_000,
            max_retries: 3,
            anti_detection: true,
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
            wait_for_selector: None,
            selector_timeout_ms: 10_000,
            fail_on_paywall: true,
        }
    }
}

/// Image acquisition behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ImageConfig {
    pub enabled: bool,

    /// Batch size; downloads within a batch run concurrently
    pub max_concurrent: usize,

    /// Images wider than this are scaled down
    pub max_width: u32,

    /// JPEG quality used when recompressing (1-100)
    pub quality: u8,

    /// Resize and recompress downloaded images
    pub optimize: bool,

    /// Per-image download timeout (milliseconds)
    pub timeout_ms: u64,

    /// Images larger than this are dropped
    pub max_bytes: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 5,
            max_width: 1200,
            quality: 80,
            optimize: true,
            timeout_ms: 15_000,
            max_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Local LLM server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LlmConfig {
    pub enabled: bool,

    /// Base URL of the Ollama-compatible server
    pub base_url: String,

    /// Preferred model
    pub model: String,

    /// Models tried in order when the preferred one is absent or fails
    pub fallback_models: Vec<String>,

    /// "short", "medium" or "long"
    pub length: String,

    pub temperature: f32,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,

    /// Consume the response as a stream of fragments
    pub stream: bool,

    /// Refresh the model inventory after this many seconds; never when unset
    pub model_cache_ttl_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            fallback_models: vec!["mistral".to_string(), "llama3".to_string()],
            length: "medium".to_string(),
            temperature: 0.3,
            timeout_ms: 120_000,
            stream: false,
            model_cache_ttl_secs: None,
        }
    }
}

/// Error recovery limits
///
/// Timeout backoff is fixed at 1s, 2s, 4s and is not configurable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RecoveryConfig {
    /// Recovery attempts per error code within one run (at most 3)
    pub max_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root directory for article folders
    pub directory: String,

    /// How many URLs of a batch are processed at once
    pub batch_concurrency: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "./digest".to_string(),
            batch_concurrency: 2,
        }
    }
}
