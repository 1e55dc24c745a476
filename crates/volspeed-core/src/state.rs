//! Lifecycle of a speed-test run

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Where a run currently is.
///
/// `Idle → Writing → ClearingCache → Reading → Done`, with `Cancelled` and
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    /// Created, not yet started
    #[default]
    Idle,
    /// Writing the temporary file
    Writing,
    /// Evicting caches between phases
    ClearingCache,
    /// Reading the file back
    Reading,
    /// Finished with a result
    Done,
    /// Stopped by the caller
    Cancelled,
    /// Stopped by an error
    Failed,
}

impl TestState {
    /// Whether the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestState::Done | TestState::Cancelled | TestState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal step
    pub fn can_transition_to(&self, next: TestState) -> bool {
        use TestState::*;
        match (self, next) {
            (from, Cancelled | Failed) => !from.is_terminal(),
            (Idle, Writing) => true,
            (Writing, ClearingCache) => true,
            (ClearingCache, Reading) => true,
            (Reading, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestState::Idle => "idle",
            TestState::Writing => "writing",
            TestState::ClearingCache => "clearing cache",
            TestState::Reading => "reading",
            TestState::Done => "done",
            TestState::Cancelled => "cancelled",
            TestState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State shared between a worker and its handle
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedState(Arc<Mutex<TestState>>);

impl SharedState {
    pub(crate) fn get(&self) -> TestState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next`. Illegal steps are logged and ignored.
    pub(crate) fn advance(&self, next: TestState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(next) {
            tracing::warn!("Ignoring state change {} -> {}", *state, next);
            return false;
        }
        tracing::debug!("State {} -> {}", *state, next);
        *state = next;
        true
    }
}
