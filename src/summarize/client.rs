//! HTTP client for an Ollama-compatible LLM server
//!
//! Endpoints used:
//! - `GET /api/tags` for the model inventory
//! - `POST /api/generate` for blocking and streamed generation

use super::{LlmError, ModelCandidate};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelCandidate>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// Body of `POST /api/generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    stream: bool,
    options: GenerateOptions,
}

/// Non-streamed generation response, also the shape of each streamed line
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin client over the LLM server's HTTP API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl OllamaClient {
    /// Creates a client for `base_url` with a per-request `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LlmError::InvalidResponse(format!("invalid base URL '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::Unreachable {
                endpoint: base_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{}{}", base, path)
    }

    /// Fetches the server's model inventory
    pub async fn list_models(&self) -> Result<Vec<ModelCandidate>, LlmError> {
        let endpoint = self.endpoint("/api/tags");
        let response = self
            .client
            .get(&endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| send_error(e, &endpoint, self.timeout))?;

        let response = check_status(response, None).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        tracing::debug!("LLM server lists {} models", tags.models.len());
        Ok(tags.models)
    }

    /// Issues a blocking generation request
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let response = self.post_generate(request, false).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(classify_server_error(None, &request.model, error));
        }
        Ok(body)
    }

    /// Issues a streamed generation request
    ///
    /// Returns once the server has accepted the request; fragments are read
    /// on demand through [`SummaryStream::next_chunk`].
    pub async fn generate_stream(&self, request: &GenerateRequest) -> Result<SummaryStream, LlmError> {
        let response = self.post_generate(request, true).await?;
        Ok(SummaryStream::new(response, request.model.clone(), self.timeout))
    }

    async fn post_generate(&self, request: &GenerateRequest, stream: bool) -> Result<Response, LlmError> {
        let endpoint = self.endpoint("/api/generate");
        let body = WireRequest {
            model: &request.model,
            prompt: &request.prompt,
            temperature: request.temperature,
            stream,
            options: GenerateOptions {
                temperature: request.temperature,
            },
        };

        let response = self
            .client
            .post(&endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(e, &endpoint, self.timeout))?;

        check_status(response, Some(&request.model)).await
    }
}

fn send_error(error: reqwest::Error, endpoint: &str, timeout: Duration) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout {
            endpoint: endpoint.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        LlmError::Unreachable {
            endpoint: endpoint.to_string(),
            message: error.to_string(),
        }
    }
}

async fn check_status(response: Response, model: Option<&str>) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);

    Err(match model {
        Some(model) => classify_server_error(Some(status.as_u16()), model, message),
        None => LlmError::Http {
            status: status.as_u16(),
            message,
        },
    })
}

/// Maps an error reported by the server for `model` onto [`LlmError`]
fn classify_server_error(status: Option<u16>, model: &str, message: String) -> LlmError {
    let lower = message.to_lowercase();
    if status == Some(404) || lower.contains("not found") {
        LlmError::ModelNotFound {
            model: model.to_string(),
            available: Vec::new(),
        }
    } else if lower.contains("memory") {
        LlmError::InsufficientMemory {
            model: model.to_string(),
            message,
        }
    } else {
        LlmError::Http {
            status: status.unwrap_or(500),
            message,
        }
    }
}

/// Pull-based stream of generated text fragments
///
/// Each call to [`next_chunk`](Self::next_chunk) reads from the network only
/// when no complete line is buffered, so at most one network chunk is held
/// at a time.
pub struct SummaryStream {
    response: Response,
    model: String,
    buffer: Vec<u8>,
    finished: bool,
    tokens_used: Option<u64>,
    timeout: Duration,
}

impl SummaryStream {
    fn new(response: Response, model: String, timeout: Duration) -> Self {
        Self {
            response,
            model,
            timeout,
            buffer: Vec::new(),
            finished: false,
            tokens_used: None,
        }
    }

    /// Model generating this stream
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Prompt token count reported with the final marker
    pub fn tokens_used(&self) -> Option<u64> {
        self.tokens_used
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns the next text fragment, or None once the stream has ended
    pub async fn next_chunk(&mut self) -> Result<Option<String>, LlmError> {
        loop {
            if self.finished {
                return Ok(None);
            }

            if let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=newline).collect();
                if let Some(fragment) = self.parse_line(&line)? {
                    return Ok(Some(fragment));
                }
                continue;
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                Ok(None) => {
                    if self.buffer.iter().all(u8::is_ascii_whitespace) {
                        self.finished = true;
                        return Ok(None);
                    }
                    // Last line without a trailing newline
                    self.buffer.push(b'\n');
                }
                Err(e) if e.is_timeout() => {
                    return Err(LlmError::Timeout {
                        endpoint: self.response.url().to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                }
                Err(e) => return Err(LlmError::InvalidResponse(e.to_string())),
            }
        }
    }

    fn parse_line(&mut self, line: &[u8]) -> Result<Option<String>, LlmError> {
        let trimmed = String::from_utf8_lossy(line);
        let trimmed = trimmed.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let parsed: GenerateResponse = serde_json::from_str(trimmed)
            .map_err(|e| LlmError::InvalidResponse(format!("bad stream line: {}", e)))?;

        if let Some(error) = parsed.error {
            self.finished = true;
            return Err(classify_server_error(None, &self.model, error));
        }

        if parsed.done {
            self.finished = true;
            self.tokens_used = parsed.prompt_eval_count;
        }

        if parsed.response.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parsed.response))
        }
    }
}

impl std::fmt::Debug for SummaryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryStream")
            .field("model", &self.model)
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}
