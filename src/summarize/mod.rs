//! LLM summarization with model fallback
//!
//! This module contains:
//! - [`OllamaClient`]: HTTP access to the local LLM server
//! - [`SummarizationEngine`]: model selection, fallback chain, streaming
//! - [`SummaryLength`] prompt presets
//!
//! The model inventory is fetched lazily and cached per engine. When a TTL
//! is configured the cache is refetched once it expires; otherwise it lives
//! as long as the engine, and [`SummarizationEngine::refresh_models`] forces
//! a refetch.

mod client;
mod prompt;

pub use client::{GenerateRequest, GenerateResponse, OllamaClient, SummaryStream};
pub use prompt::{build_prompt, SummaryLength};

use crate::config::LlmConfig;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors talking to the LLM server
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM server at {endpoint} is unreachable: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("LLM request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Model '{model}' not found")]
    ModelNotFound {
        model: String,
        available: Vec<String>,
    },

    #[error("Not enough memory to run model '{model}': {message}")]
    InsufficientMemory { model: String, message: String },

    #[error("LLM server returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response from LLM server: {0}")]
    InvalidResponse(String),

    #[error("The LLM server has no models installed")]
    NoModelsAvailable,

    #[error("All models failed (tried: {}){}", .attempted.join(", "), last_message(.last))]
    AllModelsFailed {
        attempted: Vec<String>,
        last: Option<Box<LlmError>>,
    },
}

fn last_message(last: &Option<Box<LlmError>>) -> String {
    match last {
        Some(error) => format!(": {}", error),
        None => ": none of the candidates is installed".to_string(),
    }
}

impl LlmError {
    /// The innermost error, looking through [`LlmError::AllModelsFailed`]
    pub fn root(&self) -> &LlmError {
        match self {
            Self::AllModelsFailed {
                last: Some(last), ..
            } => last.root(),
            other => other,
        }
    }
}

/// A model installed on the LLM server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default, alias = "modifiedAt")]
    pub modified_at: Option<String>,
}

/// Options for one summarization
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub length: SummaryLength,
    pub temperature: f32,
    /// Model to use; the best available model when None
    pub model: Option<String>,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            length: SummaryLength::Medium,
            temperature: 0.3,
            model: None,
        }
    }
}

impl From<&LlmConfig> for SummarizeOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            length: config.length.parse().unwrap_or_default(),
            temperature: config.temperature,
            model: Some(config.model.clone()),
        }
    }
}

/// A produced summary
#[derive(Debug, Clone, Serialize)]
pub struct SummarizationResult {
    pub summary: String,
    pub model: String,
    pub tokens_used: Option<u64>,
    pub duration: Duration,
}

struct ModelCache {
    models: Vec<ModelCandidate>,
    fetched_at: Instant,
}

/// Summarizes text with a local LLM server
pub struct SummarizationEngine {
    client: OllamaClient,
    cache: RwLock<Option<ModelCache>>,
    ttl: Option<Duration>,
}

impl SummarizationEngine {
    pub fn new(client: OllamaClient, ttl: Option<Duration>) -> Self {
        Self {
            client,
            cache: RwLock::new(None),
            ttl,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = OllamaClient::new(&config.base_url, Duration::from_millis(config.timeout_ms))?;
        Ok(Self::new(
            client,
            config.model_cache_ttl_secs.map(Duration::from_secs),
        ))
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// Cached model inventory, fetched on first use or after the TTL
    pub async fn models(&self) -> Result<Vec<ModelCandidate>, LlmError> {
        {
            let cache = self.cache.read().await;
            if let Some(cache) = cache.as_ref() {
                let fresh = self
                    .ttl
                    .map(|ttl| cache.fetched_at.elapsed() < ttl)
                    .unwrap_or(true);
                if fresh {
                    return Ok(cache.models.clone());
                }
            }
        }

        self.refresh_models().await
    }

    /// Refetches the model inventory regardless of cache state
    pub async fn refresh_models(&self) -> Result<Vec<ModelCandidate>, LlmError> {
        let models = self.client.list_models().await?;
        tracing::info!(
            "Model inventory: [{}]",
            models
                .iter()
                .map(|m| m.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        *self.cache.write().await = Some(ModelCache {
            models: models.clone(),
            fetched_at: Instant::now(),
        });
        Ok(models)
    }

    /// Picks a model for the given preference order
    ///
    /// Returns the first inventory entry matching a preference (by
    /// substring), else the first installed model, else None.
    pub async fn select_best_model(&self, preferences: &[String]) -> Result<Option<String>, LlmError> {
        let models = self.models().await?;
        Ok(select_from(&models, preferences))
    }

    /// Returns true if a model matching `name` is installed
    pub async fn is_model_available(&self, name: &str) -> Result<bool, LlmError> {
        Ok(resolve_model(&self.models().await?, name).is_some())
    }

    /// Summarizes `text` with a single model
    ///
    /// Uses `options.model` when given, otherwise the first installed model.
    pub async fn summarize(
        &self,
        text: &str,
        options: &SummarizeOptions,
    ) -> Result<SummarizationResult, LlmError> {
        let model = match &options.model {
            Some(model) => model.clone(),
            None => self
                .select_best_model(&[])
                .await?
                .ok_or(LlmError::NoModelsAvailable)?,
        };

        self.generate_with(&model, text, options).await
    }

    async fn generate_with(
        &self,
        model: &str,
        text: &str,
        options: &SummarizeOptions,
    ) -> Result<SummarizationResult, LlmError> {
        let started = Instant::now();
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: build_prompt(options.length, text),
            temperature: options.temperature,
        };

        tracing::debug!(
            "Generating {} summary with {} ({} estimated input tokens)",
            options.length,
            model,
            estimate_tokens(&request.prompt)
        );

        let response = self.client.generate(&request).await?;

        Ok(SummarizationResult {
            summary: response.response.trim().to_string(),
            model: model.to_string(),
            tokens_used: response.prompt_eval_count,
            duration: started.elapsed(),
        })
    }

    /// Tries `primary` then each fallback, strictly in order
    ///
    /// Candidates missing from the inventory are skipped. The first
    /// successful generation wins. Fails with
    /// [`LlmError::AllModelsFailed`] carrying the last generation error when
    /// every candidate was skipped or failed. Inventory errors (server
    /// unreachable) are returned as-is.
    pub async fn summarize_with_fallback(
        &self,
        text: &str,
        primary: &str,
        fallbacks: &[String],
        options: &SummarizeOptions,
    ) -> Result<SummarizationResult, LlmError> {
        let inventory = self.models().await?;
        let mut attempted = Vec::new();
        let mut last_error = None;

        for candidate in candidate_chain(primary, fallbacks) {
            let Some(model) = resolve_model(&inventory, candidate) else {
                tracing::debug!("Model {} not installed, skipping", candidate);
                continue;
            };

            attempted.push(model.clone());
            match self.generate_with(&model, text, options).await {
                Ok(result) => {
                    if model_differs(primary, &model) {
                        tracing::info!("Summarized with fallback model {}", model);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!("Model {} failed: {}", model, e);
                    last_error = Some(Box::new(e));
                }
            }
        }

        Err(LlmError::AllModelsFailed {
            attempted,
            last: last_error,
        })
    }

    /// Starts a streamed summary with a single model
    pub async fn stream(&self, text: &str, options: &SummarizeOptions) -> Result<SummaryStream, LlmError> {
        let model = match &options.model {
            Some(model) => model.clone(),
            None => self
                .select_best_model(&[])
                .await?
                .ok_or(LlmError::NoModelsAvailable)?,
        };

        self.client
            .generate_stream(&GenerateRequest {
                model,
                prompt: build_prompt(options.length, text),
                temperature: options.temperature,
            })
            .await
    }

    /// Streaming counterpart of [`summarize_with_fallback`](Self::summarize_with_fallback)
    ///
    /// Fallback applies to starting the stream; errors while reading
    /// fragments surface from [`SummaryStream::next_chunk`].
    pub async fn stream_with_fallback(
        &self,
        text: &str,
        primary: &str,
        fallbacks: &[String],
        options: &SummarizeOptions,
    ) -> Result<SummaryStream, LlmError> {
        let inventory = self.models().await?;
        let prompt = build_prompt(options.length, text);
        let mut attempted = Vec::new();
        let mut last_error = None;

        for candidate in candidate_chain(primary, fallbacks) {
            let Some(model) = resolve_model(&inventory, candidate) else {
                continue;
            };

            attempted.push(model.clone());
            let request = GenerateRequest {
                model: model.clone(),
                prompt: prompt.clone(),
                temperature: options.temperature,
            };

            match self.client.generate_stream(&request).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::warn!("Model {} failed to start streaming: {}", model, e);
                    last_error = Some(Box::new(e));
                }
            }
        }

        Err(LlmError::AllModelsFailed {
            attempted,
            last: last_error,
        })
    }
}

/// Drains `stream`, handing each fragment to `on_fragment`
pub async fn collect_stream<F>(
    mut stream: SummaryStream,
    started: Instant,
    mut on_fragment: F,
) -> Result<SummarizationResult, LlmError>
where
    F: FnMut(&str),
{
    let mut summary = String::new();
    while let Some(fragment) = stream.next_chunk().await? {
        on_fragment(&fragment);
        summary.push_str(&fragment);
    }

    Ok(SummarizationResult {
        summary: summary.trim().to_string(),
        model: stream.model().to_string(),
        tokens_used: stream.tokens_used(),
        duration: started.elapsed(),
    })
}

/// Approximate token count: ceil(chars / 4)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Model selection over an inventory snapshot
pub fn select_from(models: &[ModelCandidate], preferences: &[String]) -> Option<String> {
    preferences
        .iter()
        .find_map(|preference| resolve_model(models, preference))
        .or_else(|| models.first().map(|m| m.name.clone()))
}

/// Installed model name matching `requested`, exact names first
fn resolve_model(models: &[ModelCandidate], requested: &str) -> Option<String> {
    let requested = requested.trim().to_lowercase();
    if requested.is_empty() {
        return None;
    }

    models
        .iter()
        .find(|m| m.name.to_lowercase() == requested)
        .or_else(|| models.iter().find(|m| m.name.to_lowercase().contains(&requested)))
        .map(|m| m.name.clone())
}

fn candidate_chain<'a>(primary: &'a str, fallbacks: &'a [String]) -> impl Iterator<Item = &'a str> {
    std::iter::once(primary).chain(fallbacks.iter().map(String::as_str))
}

fn model_differs(primary: &str, model: &str) -> bool {
    !model.to_lowercase().contains(&primary.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(name: &str) -> ModelCandidate {
        ModelCandidate {
            name: name.to_string(),
            size: 1,
            digest: "d".to_string(),
            modified_at: None,
        }
    }

    fn prefs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn mount_tags(server: &MockServer, names: &[&str]) {
        let models: Vec<_> = names
            .iter()
            .map(|n| json!({"name": n, "size": 1, "digest": "d", "modified_at": "2024-01-01T00:00:00Z"}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": models })))
            .mount(server)
            .await;
    }

    async fn mount_generate(server: &MockServer, model: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "model": model })))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    fn engine(server: &MockServer) -> SummarizationEngine {
        SummarizationEngine::new(
            OllamaClient::new(&server.uri(), Duration::from_secs(5)).unwrap(),
            None,
        )
    }

    async fn requested_models(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/api/generate")
            .map(|r| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["model"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn test_select_from_empty_inventory() {
        assert_eq!(select_from(&[], &[]), None);
        assert_eq!(select_from(&[], &prefs(&["llama3"])), None);
    }

    #[test]
    fn test_select_from_prefers_in_order() {
        let inventory = vec![candidate("mistral:7b"), candidate("llama3.1:latest")];

        assert_eq!(
            select_from(&inventory, &prefs(&["phi3", "llama3.1", "mistral"])),
            Some("llama3.1:latest".to_string())
        );
        assert_eq!(
            select_from(&inventory, &prefs(&["gemma"])),
            Some("mistral:7b".to_string())
        );
        assert_eq!(select_from(&inventory, &[]), Some("mistral:7b".to_string()));
    }

    #[test]
    fn test_select_result_always_in_inventory() {
        let inventory = vec![candidate("a"), candidate("b:latest")];
        for preference in [vec![], prefs(&["b"]), prefs(&["zzz"]), prefs(&["", "a"])] {
            let chosen = select_from(&inventory, &preference).unwrap();
            assert!(inventory.iter().any(|m| m.name == chosen));
        }
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(401)), 101);
    }

    #[tokio::test]
    async fn test_fallback_to_installed_model() {
        let server = MockServer::start().await;
        mount_tags(&server, &["mistral"]).await;
        mount_generate(
            &server,
            "mistral",
            200,
            json!({"response": "  A concise summary.  ", "done": true, "prompt_eval_count": 57}),
        )
        .await;

        let result = engine(&server)
            .summarize_with_fallback(
                "Article body",
                "llama3.1",
                &prefs(&["mistral"]),
                &SummarizeOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.model, "mistral");
        assert_eq!(result.summary, "A concise summary.");
        assert_eq!(result.tokens_used, Some(57));
        assert_eq!(requested_models(&server).await, vec!["mistral"]);
    }

    #[tokio::test]
    async fn test_fallback_order_is_strict() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.1", "phi3", "mistral"]).await;
        mount_generate(&server, "llama3.1", 500, json!({"error": "runner crashed"})).await;
        mount_generate(&server, "phi3", 500, json!({"error": "runner crashed"})).await;
        mount_generate(&server, "mistral", 200, json!({"response": "ok", "done": true})).await;

        let result = engine(&server)
            .summarize_with_fallback(
                "text",
                "llama3.1",
                &prefs(&["gemma", "phi3", "mistral", "llama3"]),
                &SummarizeOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.model, "mistral");
        assert_eq!(
            requested_models(&server).await,
            vec!["llama3.1", "phi3", "mistral"]
        );
    }

    #[tokio::test]
    async fn test_all_models_failed_carries_last_error() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.1"]).await;
        mount_generate(
            &server,
            "llama3.1",
            500,
            json!({"error": "model requires more system memory"}),
        )
        .await;

        let err = engine(&server)
            .summarize_with_fallback("text", "llama3.1", &prefs(&["mistral"]), &SummarizeOptions::default())
            .await
            .unwrap_err();

        match &err {
            LlmError::AllModelsFailed { attempted, last } => {
                assert_eq!(attempted, &vec!["llama3.1".to_string()]);
                assert!(matches!(last.as_deref(), Some(LlmError::InsufficientMemory { .. })));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("memory"));
        assert!(matches!(err.root(), LlmError::InsufficientMemory { .. }));
    }

    #[tokio::test]
    async fn test_all_candidates_missing() {
        let server = MockServer::start().await;
        mount_tags(&server, &["gemma"]).await;

        let err = engine(&server)
            .summarize_with_fallback("text", "llama3.1", &prefs(&["mistral"]), &SummarizeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::AllModelsFailed { ref attempted, last: None } if attempted.is_empty()));
        assert!(requested_models(&server).await.is_empty());
    }

    #[tokio::test]
    async fn test_inventory_cached_until_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "llama3"}]})))
            .expect(2)
            .mount(&server)
            .await;

        let engine = engine(&server);
        assert!(engine.is_model_available("llama3").await.unwrap());
        assert!(!engine.is_model_available("mistral").await.unwrap());
        assert_eq!(
            engine.select_best_model(&[]).await.unwrap(),
            Some("llama3".to_string())
        );

        engine.refresh_models().await.unwrap();
        assert!(engine.is_model_available("llama3").await.unwrap());
    }

    #[tokio::test]
    async fn test_inventory_refetched_after_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
            .expect(2)
            .mount(&server)
            .await;

        let engine = SummarizationEngine::new(
            OllamaClient::new(&server.uri(), Duration::from_secs(5)).unwrap(),
            Some(Duration::from_millis(20)),
        );

        assert_eq!(engine.select_best_model(&[]).await.unwrap(), None);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(engine.select_best_model(&[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_with_fallback_collects_fragments() {
        let server = MockServer::start().await;
        mount_tags(&server, &["mistral:latest"]).await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "mistral:latest", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"response\":\"Short \",\"done\":false}\n{\"response\":\"summary.\",\"done\":false}\n{\"done\":true,\"prompt_eval_count\":9}\n",
            ))
            .mount(&server)
            .await;

        let engine = engine(&server);
        let stream = engine
            .stream_with_fallback("text", "llama3.1", &prefs(&["mistral"]), &SummarizeOptions::default())
            .await
            .unwrap();

        let mut seen = Vec::new();
        let result = collect_stream(stream, Instant::now(), |f| seen.push(f.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Short ", "summary."]);
        assert_eq!(result.summary, "Short summary.");
        assert_eq!(result.model, "mistral:latest");
        assert_eq!(result.tokens_used, Some(9));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let engine = SummarizationEngine::new(
            OllamaClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap(),
            None,
        );

        let err = engine
            .summarize_with_fallback("text", "llama3.1", &[], &SummarizeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unreachable { .. }));
    }
}
