//! Page loading with retries, anti-detection and paywall classification
//!
//! This module contains:
//! - [`PageLoader`]: drives a [`BrowserBackend`] to render one URL
//! - Anti-detection measures ([`AntiDetection`])
//! - The post-load paywall heuristic ([`detect_paywall`])
//! - HTML text extraction ([`extract_content`])
//! - The load state machine ([`LoadState`])

mod anti_detection;
mod extract;
mod paywall;
mod state;

pub use anti_detection::{
    AntiDetection, BLOCKED_RESOURCE_TYPES, TRACKER_DOMAINS, USER_AGENTS, WEBDRIVER_MASK_SCRIPT,
};
pub use extract::{extract_body_text, extract_content, ExtractedContent};
pub use paywall::{detect_paywall, has_paywall_markers, PaywallVerdict, SHORT_CONTENT_THRESHOLD};
pub use state::{LoadState, LoadTracker};

use crate::browser::{BrowserBackend, BrowserError, BrowserPage, NavigationOptions, WaitUntil};
use crate::config::BrowserConfig;
use crate::cookies::Cookie;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const BODY_TEXT_SCRIPT: &str = "() => document.body ? document.body.innerText : ''";

/// Errors returned by [`PageLoader::load`]
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Timed out loading {url} after {attempts} attempt(s) ({timeout_ms}ms each)")]
    Timeout {
        url: String,
        attempts: u32,
        timeout_ms: u64,
    },

    #[error("Failed to load {url} after {attempts} attempt(s): {message}")]
    Failed {
        url: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Per-load options
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub anti_detection: bool,
    pub wait_for_selector: Option<String>,
    pub selector_timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from(&BrowserConfig::default())
    }
}

impl From<&BrowserConfig> for LoadOptions {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries.max(1),
            anti_detection: config.anti_detection,
            wait_for_selector: config.wait_for_selector.clone(),
            selector_timeout: Duration::from_millis(config.selector_timeout_ms),
        }
    }
}

/// A rendered page, exclusively owned by the pipeline run that loaded it
pub struct PageLoadResult {
    page: Box<dyn BrowserPage>,
    pub final_url: String,
    pub status: u16,
    pub paywall: PaywallVerdict,
    pub html: String,
    /// Visible body text used for the paywall decision
    pub body_text: String,
    pub title: Option<String>,
    pub attempts: u32,
    pub states: Vec<LoadState>,
}

impl PageLoadResult {
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    /// Closes the page handle, consuming the result
    pub async fn close(mut self) -> Result<(), BrowserError> {
        self.page.close().await
    }
}

impl fmt::Debug for PageLoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageLoadResult")
            .field("final_url", &self.final_url)
            .field("status", &self.status)
            .field("paywall", &self.paywall)
            .field("title", &self.title)
            .field("html_len", &self.html.len())
            .field("attempts", &self.attempts)
            .field("states", &self.states)
            .finish()
    }
}

/// Outcome of one navigation attempt
enum AttemptError {
    /// Worth another attempt
    Retryable { timed_out: bool, status: Option<u16>, message: String },
    /// Retrying cannot help
    Fatal { status: Option<u16>, message: String },
}

/// Renders URLs through a browser backend
#[derive(Clone)]
pub struct PageLoader {
    backend: Arc<dyn BrowserBackend>,
    anti_detection: AntiDetection,
}

impl PageLoader {
    pub fn new(backend: Arc<dyn BrowserBackend>, anti_detection: AntiDetection) -> Self {
        Self {
            backend,
            anti_detection,
        }
    }

    /// Builds a loader whose retry delays follow the browser config
    pub fn from_config(backend: Arc<dyn BrowserBackend>, config: &BrowserConfig) -> Self {
        Self::new(
            backend,
            AntiDetection::new(
                Duration::from_millis(config.min_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
        )
    }

    /// Loads `url` with cookies injected, retrying up to `options.max_retries`
    ///
    /// # Flow
    ///
    /// 1. Open a page, apply anti-detection (if enabled) and inject cookies
    /// 2. Navigate; on retryable failure wait a randomized delay and retry
    /// 3. Optionally wait for `options.wait_for_selector`
    /// 4. Read the HTML and body text, classify the paywall verdict
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Timeout | Retry |
    /// | HTTP 5xx / 429 | Retry |
    /// | Network error | Retry |
    /// | HTTP 402 | Loaded, paywalled |
    /// | HTTP 401/403 with paywall markers | Loaded, paywalled |
    /// | HTTP 401/403 without markers | Fail immediately |
    /// | Other HTTP 4xx | Fail immediately |
    /// | Aborted / invalid URL | Fail immediately |
    pub async fn load(
        &self,
        url: &str,
        cookies: &[Cookie],
        options: &LoadOptions,
    ) -> Result<PageLoadResult, LoadError> {
        let mut tracker = LoadTracker::new();
        let mut page = self.backend.new_page().await?;

        if let Err(e) = self.prepare_page(page.as_mut(), cookies, options).await {
            close_page(page.as_mut(), url).await;
            return Err(e.into());
        }

        let nav_options = NavigationOptions {
            timeout: options.timeout,
            wait_until: WaitUntil::NetworkIdle,
        };
        let max_attempts = options.max_retries.max(1);
        let mut attempts = 0;
        let mut last_failure: Option<AttemptError> = None;
        let mut response = None;

        while attempts < max_attempts {
            attempts += 1;

            if attempts > 1 {
                tracker.advance(LoadState::Retrying);
                let delay = self.anti_detection.random_delay();
                tracing::info!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    url,
                    delay,
                    attempts,
                    max_attempts
                );
                tokio::time::sleep(delay).await;
            }

            tracker.advance(LoadState::Loading);
            tracing::debug!("Loading {} (attempt {}/{})", url, attempts, max_attempts);

            match navigate(page.as_mut(), url, &nav_options).await {
                Ok(nav) => {
                    response = Some(nav);
                    break;
                }
                Err(AttemptError::Fatal { status, message }) => {
                    tracing::warn!("Giving up on {}: {}", url, message);
                    last_failure = Some(AttemptError::Fatal { status, message });
                    break;
                }
                Err(failure) => {
                    if let AttemptError::Retryable { message, .. } = &failure {
                        tracing::warn!("Attempt {} for {} failed: {}", attempts, url, message);
                    }
                    last_failure = Some(failure);
                }
            }
        }

        let Some(response) = response else {
            tracker.advance(LoadState::Failed);
            close_page(page.as_mut(), url).await;
            return Err(match last_failure {
                Some(AttemptError::Retryable {
                    timed_out: true, ..
                }) => LoadError::Timeout {
                    url: url.to_string(),
                    attempts,
                    timeout_ms: options.timeout.as_millis() as u64,
                },
                Some(AttemptError::Retryable {
                    status, message, ..
                })
                | Some(AttemptError::Fatal { status, message }) => LoadError::Failed {
                    url: url.to_string(),
                    attempts,
                    status,
                    message,
                },
                None => LoadError::Failed {
                    url: url.to_string(),
                    attempts,
                    status: None,
                    message: "no attempt was made".to_string(),
                },
            });
        };

        tracker.advance(LoadState::Loaded);

        if let Some(selector) = &options.wait_for_selector {
            if let Err(e) = page.wait_for_selector(selector, options.selector_timeout).await {
                tracing::warn!("Selector '{}' not found on {}: {}", selector, url, e);
            }
        }

        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => {
                tracker.advance(LoadState::Failed);
                close_page(page.as_mut(), url).await;
                return Err(e.into());
            }
        };
        let body_text = read_body_text(page.as_ref(), &html).await;
        let title = extract_content(&html).title;
        let paywall = detect_paywall(&html, &body_text, response.status);

        if matches!(response.status, 401 | 403) && !paywall.is_gated() {
            tracing::warn!("Access denied for {} (HTTP {})", url, response.status);
            tracker.advance(LoadState::Failed);
            close_page(page.as_mut(), url).await;
            return Err(LoadError::Failed {
                url: url.to_string(),
                attempts,
                status: Some(response.status),
                message: format!("HTTP {} without a recognizable paywall", response.status),
            });
        }
        tracker.advance(LoadState::PaywallChecked);

        tracing::info!(
            "Loaded {} (HTTP {}, {} chars of text, paywall: {})",
            response.url,
            response.status,
            body_text.chars().count(),
            paywall
        );

        Ok(PageLoadResult {
            page,
            final_url: response.url,
            status: response.status,
            paywall,
            html,
            body_text,
            title,
            attempts,
            states: tracker.into_history(),
        })
    }

    async fn prepare_page(
        &self,
        page: &mut dyn BrowserPage,
        cookies: &[Cookie],
        options: &LoadOptions,
    ) -> Result<(), BrowserError> {
        if options.anti_detection {
            self.anti_detection.apply(page).await?;
        }

        if !cookies.is_empty() {
            page.set_cookies(cookies).await?;
            tracing::debug!("Injected {} cookies", cookies.len());
        }

        Ok(())
    }
}

async fn navigate(
    page: &mut dyn BrowserPage,
    url: &str,
    options: &NavigationOptions,
) -> Result<crate::browser::NavigationResponse, AttemptError> {
    match page.goto(url, options).await {
        Ok(nav) => match nav.status {
            200..=399 | 401..=403 => Ok(nav),
            429 | 500..=599 => Err(AttemptError::Retryable {
                timed_out: false,
                status: Some(nav.status),
                message: format!("HTTP {}", nav.status),
            }),
            status => Err(AttemptError::Fatal {
                status: Some(status),
                message: format!("HTTP {}", status),
            }),
        },
        Err(e @ BrowserError::Timeout { .. }) => Err(AttemptError::Retryable {
            timed_out: true,
            status: None,
            message: e.to_string(),
        }),
        Err(e @ (BrowserError::Blocked { .. }
        | BrowserError::InvalidUrl(_)
        | BrowserError::Closed)) => Err(AttemptError::Fatal {
            status: None,
            message: e.to_string(),
        }),
        Err(e) => Err(AttemptError::Retryable {
            timed_out: false,
            status: None,
            message: e.to_string(),
        }),
    }
}

/// Closes a page on a failure path, logging rather than propagating errors
async fn close_page(page: &mut dyn BrowserPage, url: &str) {
    if let Err(e) = page.close().await {
        tracing::warn!("Failed to close page for {}: {}", url, e);
    }
}

/// Body text via the page's script engine, or parsed from HTML when the
/// backend cannot evaluate scripts
async fn read_body_text(page: &dyn BrowserPage, html: &str) -> String {
    match page.evaluate(BODY_TEXT_SCRIPT, serde_json::Value::Null).await {
        Ok(serde_json::Value::String(text)) => text,
        Ok(_) | Err(_) => extract_body_text(html),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory backend for loader and pipeline tests

    use super::*;
    use crate::browser::{InterceptedRequest, NavigationResponse, RequestInterceptor, ResourceType};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use url::Url;

    /// What a scripted navigation returns
    #[derive(Debug, Clone)]
    pub enum ScriptedNav {
        Page { status: u16, html: String },
        Timeout,
        NetworkError,
    }

    #[derive(Debug, Default)]
    pub struct Recorded {
        pub user_agents: Vec<String>,
        pub cookies: Vec<Cookie>,
        pub init_scripts: Vec<String>,
        pub gotos: Vec<String>,
        pub interceptor_installed: bool,
        pub closed: usize,
        /// Makes `close` report an error after counting the call
        pub fail_close: bool,
    }

    /// Backend replaying a fixed sequence of navigation outcomes
    pub struct FakeBrowser {
        script: Arc<Mutex<VecDeque<ScriptedNav>>>,
        pub recorded: Arc<Mutex<Recorded>>,
    }

    impl FakeBrowser {
        pub fn new(script: Vec<ScriptedNav>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                recorded: Arc::new(Mutex::new(Recorded::default())),
            }
        }
    }

    #[async_trait]
    impl BrowserBackend for FakeBrowser {
        async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
            Ok(Box::new(FakePage {
                script: Arc::clone(&self.script),
                recorded: Arc::clone(&self.recorded),
                interceptor: None,
                html: None,
                url: None,
            }))
        }
    }

    struct FakePage {
        script: Arc<Mutex<VecDeque<ScriptedNav>>>,
        recorded: Arc<Mutex<Recorded>>,
        interceptor: Option<RequestInterceptor>,
        html: Option<String>,
        url: Option<String>,
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), BrowserError> {
            self.recorded.lock().unwrap().user_agents.push(user_agent.to_string());
            Ok(())
        }

        async fn set_extra_headers(&mut self, _headers: &[(String, String)]) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError> {
            self.recorded.lock().unwrap().cookies.extend_from_slice(cookies);
            Ok(())
        }

        fn set_request_interceptor(&mut self, interceptor: RequestInterceptor) {
            self.recorded.lock().unwrap().interceptor_installed = true;
            self.interceptor = Some(interceptor);
        }

        async fn add_init_script(&mut self, script: &str) -> Result<(), BrowserError> {
            self.recorded.lock().unwrap().init_scripts.push(script.to_string());
            Ok(())
        }

        async fn goto(
            &mut self,
            url: &str,
            options: &NavigationOptions,
        ) -> Result<NavigationResponse, BrowserError> {
            self.recorded.lock().unwrap().gotos.push(url.to_string());

            if let (Some(interceptor), Ok(parsed)) = (&self.interceptor, Url::parse(url)) {
                let request = InterceptedRequest {
                    url: parsed,
                    resource_type: ResourceType::Document,
                    is_navigation: true,
                };
                if interceptor(&request) == crate::browser::InterceptDecision::Abort {
                    return Err(BrowserError::Blocked { url: url.to_string() });
                }
            }

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(ScriptedNav::Page { status, html }) => {
                    self.html = Some(html);
                    self.url = Some(url.to_string());
                    Ok(NavigationResponse {
                        url: url.to_string(),
                        status,
                    })
                }
                Some(ScriptedNav::Timeout) | None => Err(BrowserError::Timeout {
                    url: url.to_string(),
                    timeout_ms: options.timeout.as_millis() as u64,
                }),
                Some(ScriptedNav::NetworkError) => Err(BrowserError::Network {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                }),
            }
        }

        async fn wait_for_selector(
            &mut self,
            selector: &str,
            timeout: Duration,
        ) -> Result<(), BrowserError> {
            match &self.html {
                Some(html) if html.contains(selector) => Ok(()),
                _ => Err(BrowserError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }

        async fn content(&self) -> Result<String, BrowserError> {
            self.html.clone().ok_or(BrowserError::NotNavigated)
        }

        async fn evaluate(
            &self,
            _script: &str,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value, BrowserError> {
            Err(BrowserError::Unsupported("fake".to_string()))
        }

        fn url(&self) -> String {
            self.url.clone().unwrap_or_else(|| "about:blank".to_string())
        }

        async fn close(&mut self) -> Result<(), BrowserError> {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.closed += 1;
            if recorded.fail_close {
                return Err(BrowserError::Network {
                    url: self.url(),
                    message: "target already closed".to_string(),
                });
            }
            Ok(())
        }
    }

    pub fn article_html(paragraph: &str) -> String {
        format!(
            "<html><head><title>Story</title></head><body><article><p>{}</p></article></body></html>",
            paragraph
        )
    }
}
