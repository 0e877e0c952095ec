//! Per-block execution state, tracked across the whole run and exposed
//! read-only to hook contexts as a cross-block snapshot.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    Pending,
    Running,
    Paused,
    Complete,
    Failed,
    Blocked,
}

impl BlockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockState::Pending => "pending",
            BlockState::Running => "running",
            BlockState::Paused => "paused",
            BlockState::Complete => "complete",
            BlockState::Failed => "failed",
            BlockState::Blocked => "blocked",
        }
    }
}

/// Terminal state of a whole run, derived at the end of `execute()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Paused,
    Failed,
    Complete,
}
