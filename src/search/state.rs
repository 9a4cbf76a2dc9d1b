//! Observable search state for the UI.

use crate::directory::SearchOutcome;

/// Where the current search attempt is in token acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptPhase {
    #[default]
    Idle,
    SilentAttempted,
    /// Waiting on the interactive sign-in; the search control should be disabled.
    InteractionPending,
    Completed,
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchView {
    /// Displayable id of the signed-in user.
    pub active_user: Option<String>,
    pub search_term: String,
    pub phase: AttemptPhase,
    /// Outcome of the latest attempt, once it has one.
    pub outcome: Option<SearchOutcome>,
    /// Incremented per search request.
    pub attempt: u64,
}

impl SearchView {
    /// Check if a new search may be started.
    pub fn is_search_enabled(&self) -> bool {
        self.phase != AttemptPhase::InteractionPending
    }

    /// Reset everything the user can see (for sign-out).
    pub fn clear(&mut self) {
        self.active_user = None;
        self.search_term.clear();
        self.phase = AttemptPhase::Idle;
        self.outcome = None;
    }
}
