//! Anti-detection measures applied to a page before navigation
//!
//! - User-agent rotation from a fixed pool
//! - Browser-like language and accept headers
//! - Request filtering for heavy resources and tracker/ad domains
//! - Masking of `navigator.webdriver`
//! - Randomized, bounded delays between load attempts

use crate::browser::{
    BrowserError, BrowserPage, InterceptDecision, InterceptedRequest, RequestInterceptor,
    ResourceType,
};
use crate::url::matches_any;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// User agents rotated per load
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Resource types aborted when anti-detection is enabled
pub const BLOCKED_RESOURCE_TYPES: &[ResourceType] = &[
    ResourceType::Image,
    ResourceType::Stylesheet,
    ResourceType::Font,
    ResourceType::Media,
];

/// Tracker and ad domains whose requests are aborted
pub const TRACKER_DOMAINS: &[&str] = &[
    "*.doubleclick.net",
    "*.google-analytics.com",
    "*.googletagmanager.com",
    "*.googlesyndication.com",
    "*.googleadservices.com",
    "*.facebook.net",
    "*.scorecardresearch.com",
    "*.chartbeat.com",
    "*.chartbeat.net",
    "*.quantserve.com",
    "*.adnxs.com",
    "*.taboola.com",
    "*.outbrain.com",
    "*.criteo.com",
    "*.amazon-adsystem.com",
    "*.hotjar.com",
];

/// Hides the automation flag from page scripts
pub const WEBDRIVER_MASK_SCRIPT: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

/// Anti-detection settings for a [`PageLoader`](super::PageLoader)
#[derive(Debug, Clone)]
pub struct AntiDetection {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for AntiDetection {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(3_000),
        }
    }
}

impl AntiDetection {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// Picks a user agent from [`USER_AGENTS`]
    pub fn random_user_agent(&self) -> &'static str {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    /// A delay uniformly drawn from `[min_delay, max_delay]`
    pub fn random_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        if max <= min {
            return self.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    pub fn extra_headers(&self) -> Vec<(String, String)> {
        vec![
            ("accept-language".to_string(), "en-US,en;q=0.9".to_string()),
            (
                "accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
        ]
    }

    /// Returns true if the request should be aborted
    pub fn should_block(request: &InterceptedRequest) -> bool {
        if BLOCKED_RESOURCE_TYPES.contains(&request.resource_type) {
            return true;
        }

        request
            .url
            .host_str()
            .map(|host| matches_any(TRACKER_DOMAINS, &host.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn request_filter() -> RequestInterceptor {
        Arc::new(|request: &InterceptedRequest| {
            if Self::should_block(request) {
                InterceptDecision::Abort
            } else {
                InterceptDecision::Continue
            }
        })
    }

    /// Installs every measure on `page`, returning the chosen user agent
    pub async fn apply(&self, page: &mut dyn BrowserPage) -> Result<&'static str, BrowserError> {
        let user_agent = self.random_user_agent();
        page.set_user_agent(user_agent).await?;
        page.set_extra_headers(&self.extra_headers()).await?;
        page.set_request_interceptor(Self::request_filter());
        page.add_init_script(WEBDRIVER_MASK_SCRIPT).await?;
        tracing::debug!("Anti-detection applied (user agent: {})", user_agent);
        Ok(user_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(url: &str, resource_type: ResourceType) -> InterceptedRequest {
        InterceptedRequest {
            url: Url::parse(url).unwrap(),
            resource_type,
            is_navigation: false,
        }
    }

    #[test]
    fn test_blocks_heavy_resources() {
        assert!(AntiDetection::should_block(&request("https://a.com/x.png", ResourceType::Image)));
        assert!(AntiDetection::should_block(&request("https://a.com/x.css", ResourceType::Stylesheet)));
        assert!(AntiDetection::should_block(&request("https://a.com/x.woff2", ResourceType::Font)));
        assert!(AntiDetection::should_block(&request("https://a.com/x.mp4", ResourceType::Media)));
        assert!(!AntiDetection::should_block(&request("https://a.com/", ResourceType::Document)));
        assert!(!AntiDetection::should_block(&request("https://a.com/app.js", ResourceType::Script)));
    }

    #[test]
    fn test_blocks_tracker_domains() {
        assert!(AntiDetection::should_block(&request(
            "https://stats.g.doubleclick.net/collect",
            ResourceType::Xhr
        )));
        assert!(AntiDetection::should_block(&request(
            "https://www.googletagmanager.com/gtm.js",
            ResourceType::Script
        )));
        assert!(!AntiDetection::should_block(&request(
            "https://news.example.com/api",
            ResourceType::Xhr
        )));
    }

    #[test]
    fn test_request_filter_decisions() {
        let filter = AntiDetection::request_filter();
        assert_eq!(
            filter(&request("https://a.com/x.png", ResourceType::Image)),
            InterceptDecision::Abort
        );
        assert_eq!(
            filter(&request("https://a.com/", ResourceType::Document)),
            InterceptDecision::Continue
        );
    }

    #[test]
    fn test_random_user_agent_from_pool() {
        let anti = AntiDetection::default();
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&anti.random_user_agent()));
        }
    }

    #[test]
    fn test_random_delay_bounded() {
        let anti = AntiDetection::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..50 {
            let delay = anti.random_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }

        let fixed = AntiDetection::new(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(fixed.random_delay(), Duration::from_millis(5));
    }
}
