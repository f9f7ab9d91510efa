//! Run context threaded through every reconciliation call.
//!
//! Replaces process-global flags: every operation receives its settings
//! explicitly, so two runs with different modes can coexist in one process.

use serde::{Deserialize, Serialize};

/// How much of a multi-key operation's status log ends up in the final record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusMode {
    /// Only the last entry is reported.
    Last,
    /// Every entry is reported, one line per reconciled key.
    #[default]
    All,
}

/// Caller-scoped settings for one reconciliation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunContext {
    /// Dry-run: predict and report changes without applying them.
    pub test_mode: bool,
    /// Status verbosity for operations that reconcile many keys.
    pub status_mode: StatusMode,
}

impl RunContext {
    pub fn new(test_mode: bool) -> Self {
        Self {
            test_mode,
            status_mode: StatusMode::default(),
        }
    }

    pub fn with_status_mode(mut self, status_mode: StatusMode) -> Self {
        self.status_mode = status_mode;
        self
    }
}
