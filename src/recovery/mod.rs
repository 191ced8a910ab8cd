//! Error taxonomy and recovery
//!
//! This module contains:
//! - [`PipelineError`]: a classified failure with context and suggestions
//! - [`normalize`]: conversion of any raised error into a [`PipelineError`]
//! - [`ErrorRecoveryEngine`]: per-kind recovery decisions with a per-code
//!   attempt cap tracked in a run-scoped [`RecoveryAttemptCounter`]

mod engine;
mod error;
mod normalize;

pub use engine::{
    ErrorRecoveryEngine, RecoveryAction, RecoveryAttemptCounter, RecoveryOutcome,
    MAX_RECOVERY_ATTEMPTS, TIMEOUT_BACKOFF_BASE,
};
pub use error::{ErrorCode, ErrorContext, ErrorKind, PipelineError, Stage};
pub use normalize::normalize;
