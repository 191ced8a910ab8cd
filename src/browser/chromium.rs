//! Chrome DevTools Protocol backend
//!
//! Drives a headless Chromium through `chromiumoxide`. Unlike
//! [`HttpBrowser`](super::HttpBrowser) this backend executes page scripts, so:
//! - init scripts are registered with `Page.addScriptToEvaluateOnNewDocument`
//! - the request interceptor sees every subresource through `Fetch.requestPaused`
//! - `evaluate` runs in the page
//!
//! Pages must be closed explicitly; a page dropped without `close()` is
//! closed on a background task.

use super::{
    BrowserBackend, BrowserError, BrowserPage, InterceptDecision, InterceptedRequest,
    LaunchOptions, NavigationOptions, NavigationResponse, RequestInterceptor, ResourceType,
};
use crate::cookies::{Cookie, SameSite};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
    FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, EnableParams as NetworkEnableParams, ErrorReason,
    EventResponseReceived, Headers, ResourceType as CdpResourceType, SetCookiesParams,
    SetExtraHttpHeadersParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use url::Url;

/// Flags that keep Chromium from advertising automation
const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--no-first-run",
];

/// How long to wait for the main document's response event after load
const STATUS_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// chromiumoxide-backed [`BrowserBackend`]
pub struct ChromiumBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    options: LaunchOptions,
}

impl ChromiumBrowser {
    /// Launches Chromium and starts its CDP event loop
    pub async fn launch(options: LaunchOptions) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .args(LAUNCH_ARGS.iter().copied())
            .arg(format!("--user-agent={}", options.user_agent))
            .request_timeout(options.connect_timeout.max(Duration::from_secs(30)));

        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }

        let config = builder.build().map_err(BrowserError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Chromium handler stopped: {}", e);
                    break;
                }
            }
        });

        tracing::info!("Launched Chromium backend (headless={})", options.headless);
        Ok(Self {
            browser,
            handler,
            options,
        })
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        page.execute(NetworkEnableParams::default())
            .await
            .map_err(|e| cdp_error("about:blank", e))?;
        page.set_user_agent(self.options.user_agent.as_str())
            .await
            .map_err(|e| cdp_error("about:blank", e))?;

        Ok(Box::new(ChromiumPage {
            page: Some(page),
            interceptor: None,
            interception: None,
            current_url: None,
        }))
    }
}

struct ChromiumPage {
    page: Option<Page>,
    interceptor: Option<RequestInterceptor>,
    /// Task answering `Fetch.requestPaused` events
    interception: Option<JoinHandle<()>>,
    current_url: Option<String>,
}

impl ChromiumPage {
    fn page(&self) -> Result<&Page, BrowserError> {
        self.page.as_ref().ok_or(BrowserError::Closed)
    }

    /// Enables the Fetch domain and routes paused requests through the interceptor
    async fn install_interception(&mut self) -> Result<(), BrowserError> {
        let Some(interceptor) = self.interceptor.clone() else {
            return Ok(());
        };
        if self.interception.is_some() {
            return Ok(());
        }

        let page = self.page()?.clone();
        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| cdp_error("about:blank", e))?;

        page.execute(
            FetchEnableParams::builder()
                .pattern(
                    RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(RequestStage::Request)
                        .build(),
                )
                .build(),
        )
        .await
        .map_err(|e| cdp_error("about:blank", e))?;

        let task_page = page.clone();
        self.interception = Some(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let resource_type = resource_type(&event.resource_type);
                let decision = match Url::parse(&event.request.url) {
                    Ok(url) => interceptor(&InterceptedRequest {
                        url,
                        resource_type,
                        is_navigation: resource_type == ResourceType::Document,
                    }),
                    Err(_) => InterceptDecision::Continue,
                };

                let result = match decision {
                    InterceptDecision::Continue => task_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ()),
                    InterceptDecision::Abort => {
                        tracing::trace!("Aborted {:?} request to {}", resource_type, event.request.url);
                        task_page
                            .execute(FailRequestParams::new(
                                event.request_id.clone(),
                                ErrorReason::BlockedByClient,
                            ))
                            .await
                            .map(|_| ())
                    }
                };

                if let Err(e) = result {
                    tracing::debug!("Failed to answer paused request {}: {}", event.request.url, e);
                }
            }
        }));

        Ok(())
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        if let Some(task) = self.interception.take() {
            task.abort();
        }
        if let Some(page) = self.page.take() {
            let url = self.current_url.take().unwrap_or_default();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::warn!("Background close failed for {}: {}", url, e);
                    }
                });
            }
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), BrowserError> {
        self.page()?
            .set_user_agent(user_agent)
            .await
            .map_err(|e| cdp_error("about:blank", e))?;
        Ok(())
    }

    async fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<(), BrowserError> {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
            .collect();

        self.page()?
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(map),
            )))
            .await
            .map_err(|e| cdp_error("about:blank", e))?;
        Ok(())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        if cookies.is_empty() {
            return Ok(());
        }

        let params = cookies
            .iter()
            .map(cookie_param)
            .collect::<Result<Vec<_>, _>>()?;

        self.page()?
            .execute(SetCookiesParams::new(params))
            .await
            .map_err(|e| cdp_error("about:blank", e))?;
        tracing::debug!("Injected {} cookies via CDP", cookies.len());
        Ok(())
    }

    fn set_request_interceptor(&mut self, interceptor: RequestInterceptor) {
        self.interceptor = Some(interceptor);
    }

    async fn add_init_script(&mut self, script: &str) -> Result<(), BrowserError> {
        self.page()?
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map_err(|e| cdp_error("about:blank", e))?;
        Ok(())
    }

    async fn goto(
        &mut self,
        url: &str,
        options: &NavigationOptions,
    ) -> Result<NavigationResponse, BrowserError> {
        let target = Url::parse(url).map_err(|_| BrowserError::InvalidUrl(url.to_string()))?;

        if let Some(interceptor) = &self.interceptor {
            let request = InterceptedRequest {
                url: target.clone(),
                resource_type: ResourceType::Document,
                is_navigation: true,
            };
            if interceptor(&request) == InterceptDecision::Abort {
                return Err(BrowserError::Blocked {
                    url: url.to_string(),
                });
            }
        }

        self.install_interception().await?;

        let page = self.page()?;
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| cdp_error(url, e))?;

        let timeout_ms = options.timeout.as_millis() as u64;
        match tokio::time::timeout(options.timeout, page.goto(target.as_str())).await {
            Err(_) => {
                return Err(BrowserError::Timeout {
                    url: url.to_string(),
                    timeout_ms,
                })
            }
            Ok(Err(CdpError::Timeout)) => {
                return Err(BrowserError::Timeout {
                    url: url.to_string(),
                    timeout_ms,
                })
            }
            Ok(Err(e)) => return Err(cdp_error(url, e)),
            Ok(Ok(_)) => {}
        }

        let mut status = None;
        let deadline = Instant::now() + STATUS_CAPTURE_TIMEOUT;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match tokio::time::timeout(remaining, responses.next()).await {
                Ok(Some(event)) if event.r#type == CdpResourceType::Document => {
                    status = Some(event.response.status as u16);
                    break;
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| target.to_string());
        let status = status.unwrap_or_else(|| {
            tracing::debug!("No document response captured for {}, assuming 200", final_url);
            200
        });

        tracing::debug!("Rendered {} (HTTP {})", final_url, status);
        self.current_url = Some(final_url.clone());

        Ok(NavigationResponse {
            url: final_url,
            status,
        })
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        scraper::Selector::parse(selector)
            .map_err(|_| BrowserError::InvalidSelector(selector.to_string()))?;
        let page = self.page()?;
        if self.current_url.is_none() {
            return Err(BrowserError::NotNavigated);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let page = self.page()?;
        let url = self.current_url.as_deref().ok_or(BrowserError::NotNavigated)?;
        page.content().await.map_err(|e| cdp_error(url, e))
    }

    async fn evaluate(
        &self,
        script: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, BrowserError> {
        let page = self.page()?;
        let url = self.current_url.as_deref().unwrap_or("about:blank");

        let result = page
            .evaluate(evaluation_expression(script, &args))
            .await
            .map_err(|e| cdp_error(url, e))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    fn url(&self) -> String {
        self.current_url
            .clone()
            .unwrap_or_else(|| "about:blank".to_string())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if let Some(task) = self.interception.take() {
            task.abort();
        }
        if let Some(page) = self.page.take() {
            let url = self.url();
            page.close().await.map_err(|e| cdp_error(&url, e))?;
            tracing::debug!("Closed Chromium page for {}", url);
        }
        Ok(())
    }
}

fn cdp_error(url: &str, error: CdpError) -> BrowserError {
    match error {
        CdpError::Timeout => BrowserError::Timeout {
            url: url.to_string(),
            timeout_ms: 0,
        },
        other => BrowserError::Network {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

/// Maps a CDP resource type onto the interceptor's coarser set
fn resource_type(kind: &CdpResourceType) -> ResourceType {
    match kind {
        CdpResourceType::Document => ResourceType::Document,
        CdpResourceType::Stylesheet => ResourceType::Stylesheet,
        CdpResourceType::Image => ResourceType::Image,
        CdpResourceType::Media | CdpResourceType::TextTrack => ResourceType::Media,
        CdpResourceType::Font => ResourceType::Font,
        CdpResourceType::Script => ResourceType::Script,
        CdpResourceType::Xhr | CdpResourceType::Fetch | CdpResourceType::EventSource => {
            ResourceType::Xhr
        }
        _ => ResourceType::Other,
    }
}

fn cookie_param(cookie: &Cookie) -> Result<CookieParam, BrowserError> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(if cookie.path.is_empty() { "/".to_string() } else { cookie.path.clone() })
        .secure(cookie.secure)
        .http_only(cookie.http_only);

    if let Some(same_site) = cookie.same_site {
        builder = builder.same_site(match same_site {
            SameSite::Strict => CookieSameSite::Strict,
            SameSite::Lax => CookieSameSite::Lax,
            SameSite::None => CookieSameSite::None,
        });
    }
    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires as f64 / 1000.0));
    }

    builder.build().map_err(|reason| BrowserError::Network {
        url: cookie.domain.clone(),
        message: format!("invalid cookie '{}': {}", cookie.name, reason),
    })
}

/// Wraps `script` so that non-null `args` are passed as its single argument
fn evaluation_expression(script: &str, args: &serde_json::Value) -> String {
    if args.is_null() {
        script.to_string()
    } else {
        format!("({})({})", script, args)
    }
}
