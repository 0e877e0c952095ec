use dashmap::DashMap;
use prompty_hooks::BuiltinRegistry;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Shared state behind every handler. `active_runs` is the process-wide
/// table keyed by job id that lets a `/pipeline/stop` request on a separate
/// connection cancel the executor a concurrent `/pipeline/run` SSE stream
/// is driving.
pub struct AppState {
    pub workspace_root: PathBuf,
    pub builtins: BuiltinRegistry,
    pub active_runs: DashMap<String, CancellationToken>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            builtins: BuiltinRegistry::default(),
            active_runs: DashMap::new(),
        }
    }
}
