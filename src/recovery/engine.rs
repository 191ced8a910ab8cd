//! Recovery dispatch

use super::error::{ErrorCode, ErrorKind, PipelineError};
use crate::config::RecoveryConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Recovery attempts per error code, owned by one pipeline run
#[derive(Debug, Clone, Default)]
pub struct RecoveryAttemptCounter {
    attempts: HashMap<ErrorCode, u32>,
}

impl RecoveryAttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more attempt for `code` and returns the new count
    pub fn record(&mut self, code: ErrorCode) -> u32 {
        let count = self.attempts.entry(code).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, code: ErrorCode) -> u32 {
        self.attempts.get(&code).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.attempts.values().sum()
    }

    pub fn reset(&mut self) {
        self.attempts.clear();
    }
}

/// What the pipeline should do about an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Leave the image out and continue
    DropImage,
    /// Finish the run without a summary
    SkipSummarization,
    /// Retry summarization with this model
    UseModel(String),
    /// Wait, then retry the failed operation
    RetryAfter(Duration),
    /// Fresh credentials are needed
    RequireCredentials,
    /// Fresh cookies are needed
    RequireCookies,
    /// The configuration must be fixed
    FixConfiguration,
    /// Nothing can be done automatically
    None,
}

/// Result of [`ErrorRecoveryEngine::handle`]
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    /// False when the attempt cap for the code was already exhausted
    pub handled: bool,
    /// True if the pipeline can continue by applying `action`
    pub recovered: bool,
    pub action: RecoveryAction,
    pub suggestions: Vec<String>,
    /// Attempt number recorded for the error's code
    pub attempt: u32,
}

/// Upper bound on recovery attempts per error code within one run
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// First timeout backoff delay; doubles on each further attempt
pub const TIMEOUT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);

/// Decides how the pipeline reacts to each classified error
#[derive(Debug, Clone)]
pub struct ErrorRecoveryEngine {
    max_attempts: u32,
    backoff_base: Duration,
}

impl Default for ErrorRecoveryEngine {
    fn default() -> Self {
        Self::new(MAX_RECOVERY_ATTEMPTS)
    }
}

impl ErrorRecoveryEngine {
    /// Creates an engine allowing `max_attempts` per code, clamped to
    /// `1..=MAX_RECOVERY_ATTEMPTS`
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_RECOVERY_ATTEMPTS),
            backoff_base: TIMEOUT_BACKOFF_BASE,
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.max_attempts)
    }

    #[cfg(test)]
    pub(crate) fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before timeout retry number `attempt` (1-based): base × 2^(attempt-1)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    /// True exactly for paywall, expired-cookie and configuration errors
    pub fn is_fatal(error: &PipelineError) -> bool {
        error.code().is_fatal()
    }

    /// Action for an error on its `attempt`-th occurrence, ignoring the cap
    ///
    /// Returns the action and whether applying it lets the run continue.
    pub fn plan(&self, error: &PipelineError, attempt: u32) -> (RecoveryAction, bool) {
        if !error.is_recoverable() {
            return (intervention_for(error.kind()), false);
        }

        match error.kind() {
            ErrorKind::ImageDownloadFailed { .. } => (RecoveryAction::DropImage, true),
            ErrorKind::LlmServerUnreachable { .. } => (RecoveryAction::SkipSummarization, true),
            ErrorKind::ModelNotFound { available, .. } => match available.first() {
                Some(model) => (RecoveryAction::UseModel(model.clone()), true),
                None => (RecoveryAction::SkipSummarization, true),
            },
            ErrorKind::InsufficientMemory { .. } => (RecoveryAction::SkipSummarization, true),
            ErrorKind::NetworkTimeout { .. } => {
                (RecoveryAction::RetryAfter(self.backoff_delay(attempt)), true)
            }
            ErrorKind::PaywallDetected { .. }
            | ErrorKind::CookieExpired { .. }
            | ErrorKind::ConfigValidation { .. } => (intervention_for(error.kind()), false),
            ErrorKind::FileSystem { .. } | ErrorKind::Unknown => (RecoveryAction::None, false),
        }
    }

    /// Records the error against `counter` and decides what to do
    ///
    /// Once a code has been seen more than `max_attempts` times in a run
    /// the outcome is `handled = false, recovered = false` regardless of
    /// the error kind.
    pub fn handle(&self, error: &PipelineError, counter: &mut RecoveryAttemptCounter) -> RecoveryOutcome {
        let code = error.code();
        let attempt = counter.record(code);

        if attempt > self.max_attempts {
            tracing::warn!(
                "Recovery limit reached for {} ({} of {} attempts): {}",
                code,
                attempt,
                self.max_attempts,
                error.message()
            );
            return RecoveryOutcome {
                handled: false,
                recovered: false,
                action: RecoveryAction::None,
                suggestions: error.suggestions().to_vec(),
                attempt,
            };
        }

        let (action, recovered) = self.plan(error, attempt);

        if recovered {
            tracing::info!(
                "Recovering from {} (attempt {}/{}): {:?}",
                code,
                attempt,
                self.max_attempts,
                action
            );
        } else {
            tracing::warn!("No automatic recovery for {}: {}", code, error.message());
        }

        RecoveryOutcome {
            handled: true,
            recovered,
            action,
            suggestions: error.suggestions().to_vec(),
            attempt,
        }
    }

    /// [`handle`](Self::handle), then waits out any backoff it prescribes
    pub async fn recover(&self, error: &PipelineError, counter: &mut RecoveryAttemptCounter) -> RecoveryOutcome {
        let outcome = self.handle(error, counter);
        if let RecoveryAction::RetryAfter(delay) = outcome.action {
            tracing::debug!("Backing off {:?} before retrying", delay);
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

fn intervention_for(kind: &ErrorKind) -> RecoveryAction {
    match kind {
        ErrorKind::PaywallDetected { .. } => RecoveryAction::RequireCredentials,
        ErrorKind::CookieExpired { .. } => RecoveryAction::RequireCookies,
        ErrorKind::ConfigValidation { .. } => RecoveryAction::FixConfiguration,
        _ => RecoveryAction::None,
    }
}
