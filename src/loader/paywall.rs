//! Post-load paywall heuristic
//!
//! Scans rendered HTML for subscription/login/metering language and weighs it
//! against how much readable text the page actually delivered. False
//! negatives are expected; thin extractions are caught later by content
//! quality, not re-detected here.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Pages with less visible text than this are considered gated when a
/// paywall keyword is present
pub const SHORT_CONTENT_THRESHOLD: usize = 500;

/// Classification of whether rendered content appears gated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PaywallVerdict {
    /// No gate detected
    None,
    /// Gate keywords with a short, partially readable body
    SoftOverlay,
    /// Gate keywords and no readable body at all
    ClientHard,
    /// The server refused the content (402, or 401/403 with gate keywords)
    ServerSide,
}

impl PaywallVerdict {
    pub fn is_gated(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SoftOverlay => "soft_overlay",
            Self::ClientHard => "client_hard",
            Self::ServerSide => "server_side",
        }
    }
}

impl fmt::Display for PaywallVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn paywall_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(subscribe|subscription|subscriber|log\s?in|sign\s?in|paywall|metered|premium\s+content|members[\s-]only)",
        )
        .expect("paywall pattern is a valid regex")
    })
}

/// Returns true if the HTML contains paywall language
pub fn has_paywall_markers(html: &str) -> bool {
    paywall_pattern().is_match(html)
}

/// Classifies a loaded page
///
/// # Arguments
///
/// * `html` - Rendered document
/// * `body_text` - Visible text extracted from the body
/// * `status` - HTTP status of the main document
pub fn detect_paywall(html: &str, body_text: &str, status: u16) -> PaywallVerdict {
    let matched = has_paywall_markers(html);
    let text_len = body_text.trim().chars().count();

    if status == 402 || (matches!(status, 401 | 403) && matched) {
        return PaywallVerdict::ServerSide;
    }

    if !matched {
        return PaywallVerdict::None;
    }

    if text_len == 0 {
        PaywallVerdict::ClientHard
    } else if text_len < SHORT_CONTENT_THRESHOLD {
        PaywallVerdict::SoftOverlay
    } else {
        PaywallVerdict::None
    }
}
