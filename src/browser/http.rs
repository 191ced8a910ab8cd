//! Static HTTP rendering backend
//!
//! Fetches the main document with reqwest and exposes it through the
//! [`BrowserPage`] interface. No JavaScript runs, so `evaluate` is
//! unsupported and init scripts are only recorded; cookie scoping,
//! header overrides, the request interceptor and navigation timeouts
//! behave as they would in a real browser for the document request.

use super::{
    BrowserBackend, BrowserError, BrowserPage, InterceptDecision, InterceptedRequest,
    LaunchOptions, NavigationOptions, NavigationResponse, RequestInterceptor, ResourceType,
};
use crate::cookies::Cookie;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

/// reqwest-backed [`BrowserBackend`]
#[derive(Debug, Clone)]
pub struct HttpBrowser {
    client: Client,
    options: LaunchOptions,
}

impl HttpBrowser {
    /// Builds the shared HTTP client used by every page
    pub fn launch(options: LaunchOptions) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        tracing::debug!("Launched HTTP browser backend (headless={})", options.headless);
        Ok(Self { client, options })
    }
}

#[async_trait]
impl BrowserBackend for HttpBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            user_agent: self.options.user_agent.clone(),
            headers: Vec::new(),
            cookies: Vec::new(),
            interceptor: None,
            init_scripts: Vec::new(),
            current_url: None,
            html: None,
            closed: false,
        }))
    }
}

struct HttpPage {
    client: Client,
    user_agent: String,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    interceptor: Option<RequestInterceptor>,
    init_scripts: Vec<String>,
    current_url: Option<Url>,
    html: Option<String>,
    closed: bool,
}

impl HttpPage {
    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    /// Builds the `Cookie` header value for cookies scoped to `url`
    fn cookie_header(&self, url: &Url) -> Option<String> {
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches_url(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

#[async_trait]
impl BrowserPage for HttpPage {
    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.user_agent = user_agent.to_string();
        Ok(())
    }

    async fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.headers = headers.to_vec();
        Ok(())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.cookies.extend_from_slice(cookies);
        Ok(())
    }

    fn set_request_interceptor(&mut self, interceptor: RequestInterceptor) {
        self.interceptor = Some(interceptor);
    }

    async fn add_init_script(&mut self, script: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.init_scripts.push(script.to_string());
        Ok(())
    }

    async fn goto(
        &mut self,
        url: &str,
        options: &NavigationOptions,
    ) -> Result<NavigationResponse, BrowserError> {
        self.ensure_open()?;
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

        let mut request = self
            .client
            .get(target.clone())
            .timeout(options.timeout)
            .header(reqwest::header::USER_AGENT, &self.user_agent);

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if let Some(cookie_header) = self.cookie_header(&target) {
            request = request.header(reqwest::header::COOKIE, cookie_header);
        }

        let timeout_ms = options.timeout.as_millis() as u64;
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                BrowserError::Timeout {
                    url: url.to_string(),
                    timeout_ms,
                }
            } else {
                BrowserError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response.text().await.map_err(classify)?;

        tracing::debug!("Fetched {} ({} bytes, HTTP {})", final_url, body.len(), status);

        self.html = Some(body);
        self.current_url = Some(final_url.clone());

        Ok(NavigationResponse {
            url: final_url.to_string(),
            status,
        })
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let parsed =
            Selector::parse(selector).map_err(|_| BrowserError::InvalidSelector(selector.to_string()))?;
        let html = self.html.as_deref().ok_or(BrowserError::NotNavigated)?;

        // A static document never changes, so either the element is there or it never will be
        if Html::parse_document(html).select(&parsed).next().is_some() {
            Ok(())
        } else {
            Err(BrowserError::SelectorTimeout {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        self.html.clone().ok_or(BrowserError::NotNavigated)
    }

    async fn evaluate(
        &self,
        _script: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value, BrowserError> {
        self.ensure_open()?;
        Err(BrowserError::Unsupported(
            "script evaluation requires a JavaScript-capable backend".to_string(),
        ))
    }

    fn url(&self) -> String {
        self.current_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "about:blank".to_string())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.closed = true;
        self.html = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_cookie(domain: &str) -> Cookie {
        Cookie {
            name: "sid".to_string(),
            value: "secret".to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: false,
            http_only: true,
            same_site: None,
            expires: None,
        }
    }

    #[tokio::test]
    async fn test_goto_sends_cookies_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .and(header("cookie", "sid=secret"))
            .and(header("user-agent", "TestAgent/1.0"))
            .and(header("accept-language", "en-US"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><article>Hi</article></body></html>"))
            .mount(&server)
            .await;

        let browser = HttpBrowser::launch(LaunchOptions::default()).unwrap();
        let mut page = browser.new_page().await.unwrap();
        page.set_user_agent("TestAgent/1.0").await.unwrap();
        page.set_extra_headers(&[("accept-language".to_string(), "en-US".to_string())])
            .await
            .unwrap();
        page.set_cookies(&[session_cookie("127.0.0.1")]).await.unwrap();

        let response = page
            .goto(&format!("{}/story", server.uri()), &NavigationOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(page.content().await.unwrap().contains("<article>"));
        assert!(page.wait_for_selector("article", Duration::from_millis(10)).await.is_ok());
        assert!(matches!(
            page.wait_for_selector(".missing", Duration::from_millis(10)).await,
            Err(BrowserError::SelectorTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_goto_sends_multi_value_header_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .and(header_exists("accept-language"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
            .mount(&server)
            .await;

        let browser = HttpBrowser::launch(LaunchOptions::default()).unwrap();
        let mut page = browser.new_page().await.unwrap();
        page.set_extra_headers(&[("accept-language".to_string(), "en-US,en;q=0.9".to_string())])
            .await
            .unwrap();

        let response = page
            .goto(&format!("{}/story", server.uri()), &NavigationOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let requests = server.received_requests().await.unwrap();
        let sent: Vec<String> = requests[0]
            .headers
            .get(&"accept-language".into())
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(sent.join(","), "en-US,en;q=0.9");
    }

    #[tokio::test]
    async fn test_goto_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let browser = HttpBrowser::launch(LaunchOptions::default()).unwrap();
        let mut page = browser.new_page().await.unwrap();
        let options = NavigationOptions {
            timeout: Duration::from_millis(50),
            ..NavigationOptions::default()
        };

        let err = page.goto(&server.uri(), &options).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_interceptor_can_abort_navigation() {
        let browser = HttpBrowser::launch(LaunchOptions::default()).unwrap();
        let mut page = browser.new_page().await.unwrap();
        page.set_request_interceptor(Arc::new(|_req: &InterceptedRequest| InterceptDecision::Abort));

        let err = page
            .goto("http://127.0.0.1:9/", &NavigationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_closed_page_rejects_operations() {
        let browser = HttpBrowser::launch(LaunchOptions::default()).unwrap();
        let mut page = browser.new_page().await.unwrap();
        assert_eq!(page.url(), "about:blank");
        assert!(matches!(page.content().await, Err(BrowserError::NotNavigated)));

        page.close().await.unwrap();
        assert!(matches!(page.content().await, Err(BrowserError::Closed)));
        assert!(matches!(
            page.evaluate("1", serde_json::Value::Null).await,
            Err(BrowserError::Closed)
        ));
    }
}
