//! Pause token for cooperative pausing.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A token an operator (or signal handler) uses to ask a run to pause.
///
/// Requests are idempotent: only the first reason is kept until the token
/// is cleared.
#[derive(Default)]
pub struct PauseToken {
    requested: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl PauseToken {
    /// Creates a new pause token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a pause at the next unit boundary.
    ///
    /// The reason is stored before the flag is raised, so an observer that
    /// sees a pending pause always sees its reason.
    pub fn request(&self, reason: impl Into<String>) {
        let mut slot = self.reason.write();
        if self.requested.load(Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        info!(reason = %reason, "Pause requested");
        *slot = Some(reason);
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Returns whether a pause has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Returns the pause reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Withdraws a pending request. Called when a run resumes.
    pub fn clear(&self) {
        let mut slot = self.reason.write();
        self.requested.store(false, Ordering::SeqCst);
        *slot = None;
    }
}

impl std::fmt::Debug for PauseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseToken")
            .field("requested", &self.is_requested())
            .field("reason", &self.reason())
            .finish()
    }
}
