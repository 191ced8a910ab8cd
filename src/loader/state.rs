/// Load state definitions for tracking a single page load
///
/// Idle → Loading → {Retrying → Loading}* → {Loaded | Failed}, and a loaded
/// page moves on to PaywallChecked once its content has been classified.
use std::fmt;

/// Represents the current state of a page load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Page handle created, nothing requested yet
    Idle,

    /// Navigation in progress
    Loading,

    /// Previous attempt failed; waiting before the next one
    Retrying,

    /// Navigation completed
    Loaded,

    /// Content classified by the paywall heuristic
    PaywallChecked,

    /// All attempts exhausted or a non-retryable failure occurred
    Failed,
}

impl LoadState {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PaywallChecked | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: LoadState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Loading)
                | (Self::Idle, Self::Failed)
                | (Self::Loading, Self::Retrying)
                | (Self::Loading, Self::Loaded)
                | (Self::Loading, Self::Failed)
                | (Self::Retrying, Self::Loading)
                | (Self::Retrying, Self::Failed)
                | (Self::Loaded, Self::PaywallChecked)
                | (Self::Loaded, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Retrying => "retrying",
            Self::Loaded => "loaded",
            Self::PaywallChecked => "paywall_checked",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Records the states a load passes through, rejecting illegal transitions
#[derive(Debug, Clone)]
pub struct LoadTracker {
    history: Vec<LoadState>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self {
            history: vec![LoadState::Idle],
        }
    }

    pub fn current(&self) -> LoadState {
        self.history.last().copied().unwrap_or(LoadState::Idle)
    }

    /// Moves to `next`; illegal transitions are logged and ignored
    pub fn advance(&mut self, next: LoadState) -> bool {
        let current = self.current();
        if current.can_transition_to(next) {
            tracing::trace!("Load state {} -> {}", current, next);
            self.history.push(next);
            true
        } else {
            tracing::warn!("Ignoring invalid load state transition {} -> {}", current, next);
            false
        }
    }

    pub fn history(&self) -> &[LoadState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<LoadState> {
        self.history
    }
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!LoadState::Idle.is_terminal());
        assert!(!LoadState::Loading.is_terminal());
        assert!(!LoadState::Retrying.is_terminal());
        assert!(!LoadState::Loaded.is_terminal());
        assert!(LoadState::PaywallChecked.is_terminal());
        assert!(LoadState::Failed.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(LoadState::Idle.can_transition_to(LoadState::Loading));
        assert!(LoadState::Loading.can_transition_to(LoadState::Retrying));
        assert!(LoadState::Retrying.can_transition_to(LoadState::Loading));
        assert!(LoadState::Loading.can_transition_to(LoadState::Loaded));
        assert!(LoadState::Loaded.can_transition_to(LoadState::PaywallChecked));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!LoadState::Idle.can_transition_to(LoadState::Loaded));
        assert!(!LoadState::Retrying.can_transition_to(LoadState::Loaded));
        assert!(!LoadState::Failed.can_transition_to(LoadState::Loading));
        assert!(!LoadState::PaywallChecked.can_transition_to(LoadState::Loading));
    }

    #[test]
    fn test_tracker_records_history() {
        let mut tracker = LoadTracker::new();
        assert!(tracker.advance(LoadState::Loading));
        assert!(tracker.advance(LoadState::Retrying));
        assert!(tracker.advance(LoadState::Loading));
        assert!(!tracker.advance(LoadState::PaywallChecked));
        assert!(tracker.advance(LoadState::Loaded));
        assert!(tracker.advance(LoadState::PaywallChecked));

        assert_eq!(
            tracker.history(),
            &[
                LoadState::Idle,
                LoadState::Loading,
                LoadState::Retrying,
                LoadState::Loading,
                LoadState::Loaded,
                LoadState::PaywallChecked,
            ]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", LoadState::PaywallChecked), "paywall_checked");
    }
}
