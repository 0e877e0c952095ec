//! The 3-layer hook-config merge lives in `prompty-jobs` (it owns the
//! `HookConfig`/`HookEntry` types and runs once per job at expansion time,
//! before any `HookPipeline` exists). Re-exported here so callers that
//! think in terms of "the hook crate" can still find it.

pub use prompty_jobs::{merge_hook_config, select_mods};
