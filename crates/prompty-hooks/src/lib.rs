//! Hook dispatch: look up a hook name in configuration, run its script
//! chain against a shared mutable context, short-circuit on the first
//! error, and hand off to the `error` hook chain.

mod context;
mod merge;
mod pipeline;
mod registry;
mod result;
mod script;

pub use context::HookContext;
pub use merge::{merge_hook_config, select_mods};
pub use pipeline::HookPipeline;
pub use registry::{BuiltinHook, BuiltinRegistry, LogHook, SkipHook};
pub use result::{HookError, HookResult, HookStatus};
pub use script::{resolve_script, run_external_script, ScriptRef};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[tokio::test]
    async fn bare_builtin_hook_succeeds_and_preserves_context() {
        let mut hooks_config = HashMap::new();
        hooks_config.insert(
            "node_start".to_string(),
            vec![prompty_jobs::HookEntry { script: "builtin:skip".to_string(), params: Map::new() }],
        );
        let pipeline = HookPipeline::new(PathBuf::from("/tmp/job"), PathBuf::from("/tmp/project"), hooks_config);

        let mut ctx = HookContext::new();
        ctx.insert("block_path", Value::String("0".to_string()));

        let result = pipeline.execute_hook("node_start", ctx).await;
        assert!(result.is_success());
        assert_eq!(
            result.modify_context.get("block_path"),
            Some(&Value::String("0".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_script_is_a_hook_error_not_a_panic() {
        let mut hooks_config = HashMap::new();
        hooks_config.insert(
            "pre".to_string(),
            vec![prompty_jobs::HookEntry { script: "does/not/exist.py".to_string(), params: Map::new() }],
        );
        let pipeline = HookPipeline::new(PathBuf::from("/tmp/job"), PathBuf::from("/tmp/project"), hooks_config);

        let result = pipeline.execute_hook("pre", HookContext::new()).await;
        assert!(result.is_error());
        assert_eq!(result.error.unwrap().code, "SCRIPT_NOT_FOUND");
    }

    #[tokio::test]
    async fn unconfigured_hook_name_is_bare_success() {
        let pipeline = HookPipeline::new(PathBuf::from("/tmp/job"), PathBuf::from("/tmp/project"), HashMap::new());
        let result = pipeline.execute_hook("generate", HookContext::new()).await;
        assert!(result.is_success());
        assert!(result.data.is_empty());
    }
}
