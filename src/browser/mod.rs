//! Browser-automation abstraction
//!
//! The loader only needs a handful of capabilities from a rendering backend:
//! open a page, inject cookies and headers, filter outgoing requests,
//! navigate, wait for a selector, read the rendered HTML and evaluate a
//! script. [`BrowserBackend`] and [`BrowserPage`] capture exactly those, so
//! the Chromium backend (`chromium` feature) and the static [`HttpBrowser`]
//! are interchangeable.

#[cfg(feature = "chromium")]
mod chromium;
mod http;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumBrowser;
pub use http::HttpBrowser;

use crate::cookies::Cookie;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors raised by a browser backend
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request to {url} was aborted by the request interceptor")]
    Blocked { url: String },

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Selector '{selector}' not found within {timeout_ms}ms")]
    SelectorTimeout { selector: String, timeout_ms: u64 },

    #[error("Invalid CSS selector '{0}'")]
    InvalidSelector(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("No document has been loaded in this page")]
    NotNavigated,

    #[error("Page is closed")]
    Closed,
}

impl BrowserError {
    /// Returns true for failures caused by an elapsed timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::SelectorTimeout { .. })
    }
}

/// Kind of resource an outgoing request fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Other,
}

/// An outgoing request as presented to the interceptor
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub url: Url,
    pub resource_type: ResourceType,
    /// True for the top-level navigation request
    pub is_navigation: bool,
}

/// Decision returned by a [`RequestInterceptor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptDecision {
    Continue,
    Abort,
}

/// Synchronous per-request filter installed on a page
pub type RequestInterceptor = Arc<dyn Fn(&InterceptedRequest) -> InterceptDecision + Send + Sync>;

/// When navigation is considered complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    /// No network activity for a short period
    NetworkIdle,
}

/// Options for [`BrowserPage::goto`]
#[derive(Debug, Clone)]
pub struct NavigationOptions {
    pub timeout: Duration,
    pub wait_until: WaitUntil,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            wait_until: WaitUntil::NetworkIdle,
        }
    }
}

/// Outcome of a navigation
#[derive(Debug, Clone)]
pub struct NavigationResponse {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status of the main document
    pub status: u16,
}

/// Options for launching a backend
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// User agent used when a page does not set its own
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Chrome/Chromium binary; located automatically when unset
    pub executable: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: format!("article-digest/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            executable: None,
        }
    }
}

/// Which rendering backend drives page loads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Static fetch with reqwest; no scripts run
    #[default]
    Http,
    /// Headless Chromium over CDP (requires the `chromium` feature)
    Chromium,
}

impl BackendKind {
    /// True if this build can launch the backend
    pub fn is_available(&self) -> bool {
        match self {
            Self::Http => true,
            Self::Chromium => cfg!(feature = "chromium"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Chromium => "chromium",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "chromium" | "chrome" => Ok(Self::Chromium),
            other => Err(format!("unknown browser backend '{}'", other)),
        }
    }
}

/// Launches the backend selected by `kind`
pub async fn launch_backend(
    kind: BackendKind,
    options: LaunchOptions,
) -> Result<Arc<dyn BrowserBackend>, BrowserError> {
    match kind {
        BackendKind::Http => Ok(Arc::new(HttpBrowser::launch(options)?)),
        #[cfg(feature = "chromium")]
        BackendKind::Chromium => Ok(Arc::new(ChromiumBrowser::launch(options).await?)),
        #[cfg(not(feature = "chromium"))]
        BackendKind::Chromium => Err(BrowserError::Launch(
            "this build does not include the chromium backend (enable the `chromium` feature)"
                .to_string(),
        )),
    }
}

/// A rendering backend capable of opening pages
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;
}

/// A single page (tab) owned by one pipeline run
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), BrowserError>;

    async fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<(), BrowserError>;

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError>;

    /// Installs a filter consulted for every outgoing request
    fn set_request_interceptor(&mut self, interceptor: RequestInterceptor);

    /// Registers a script that runs before any page script on every navigation
    async fn add_init_script(&mut self, script: &str) -> Result<(), BrowserError>;

    async fn goto(
        &mut self,
        url: &str,
        options: &NavigationOptions,
    ) -> Result<NavigationResponse, BrowserError>;

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration)
        -> Result<(), BrowserError>;

    /// Returns the rendered HTML of the current document
    async fn content(&self) -> Result<String, BrowserError>;

    async fn evaluate(
        &self,
        script: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, BrowserError>;

    /// Current document URL, `about:blank` before the first navigation
    fn url(&self) -> String;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("http".parse::<BackendKind>(), Ok(BackendKind::Http));
        assert_eq!("Chromium".parse::<BackendKind>(), Ok(BackendKind::Chromium));
        assert_eq!("chrome".parse::<BackendKind>(), Ok(BackendKind::Chromium));
        assert!("webkit".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default(), BackendKind::Http);
    }

    #[tokio::test]
    async fn test_launch_http_backend() {
        let backend = launch_backend(BackendKind::Http, LaunchOptions::default())
            .await
            .unwrap();
        let mut page = backend.new_page().await.unwrap();
        assert_eq!(page.url(), "about:blank");
        page.close().await.unwrap();
    }

    #[cfg(not(feature = "chromium"))]
    #[tokio::test]
    async fn test_chromium_unavailable_without_feature() {
        assert!(!BackendKind::Chromium.is_available());
        let result = launch_backend(BackendKind::Chromium, LaunchOptions::default()).await;
        assert!(matches!(result, Err(BrowserError::Launch(_))));
    }
}
