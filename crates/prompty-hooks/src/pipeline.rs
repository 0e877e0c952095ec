//! `HookPipeline` — resolves a hook name against configuration and runs its
//! script chain, with the short-circuit-on-error and error-hook-chain
//! semantics the executor relies on.

use crate::context::HookContext;
use crate::registry::BuiltinRegistry;
use crate::result::{HookError, HookResult, HookStatus};
use crate::script::{resolve_script, run_external_script, ScriptRef};
use chrono::Utc;
use prompty_jobs::HookConfig;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub struct HookPipeline {
    job_dir: PathBuf,
    project_root: PathBuf,
    hooks_config: HookConfig,
    builtins: BuiltinRegistry,
    // Per-instance cache, keyed by the raw `script:` string — never shared
    // across `HookPipeline` instances.
    cache: Mutex<HashMap<String, ScriptRef>>,
}

impl HookPipeline {
    pub fn new(job_dir: PathBuf, project_root: PathBuf, hooks_config: HookConfig) -> Self {
        Self {
            job_dir,
            project_root,
            hooks_config,
            builtins: BuiltinRegistry::default(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_builtins(mut self, builtins: BuiltinRegistry) -> Self {
        self.builtins = builtins;
        self
    }

    fn resolve_cached(&self, raw: &str) -> Result<ScriptRef, HookError> {
        if let Some(cached) = self.cache.lock().expect("hook script cache poisoned").get(raw) {
            return Ok(cached.clone());
        }
        let resolved = resolve_script(raw, &self.job_dir, &self.project_root)?;
        self.cache.lock().expect("hook script cache poisoned").insert(raw.to_string(), resolved.clone());
        Ok(resolved)
    }

    async fn run_one(&self, raw: &str, context: &HookContext, params: &Map<String, Value>) -> HookResult {
        match self.resolve_cached(raw) {
            Ok(ScriptRef::Builtin(name)) => match self.builtins.get(&name) {
                Some(hook) => hook.run(context, params).await,
                None => HookResult::error(HookError::new(
                    "BUILTIN_NOT_FOUND",
                    format!("no built-in hook named '{name}'"),
                )),
            },
            Ok(ScriptRef::External(path)) => run_external_script(&path, context, params).await,
            Err(e) => HookResult::error(e),
        }
    }

    /// Execute the scripts registered under `name`, threading `context`
    /// through each in order. On the first `error` status, the remaining
    /// scripts in this hook's list are skipped, the `error` hook chain runs
    /// once, and the failing result is returned.
    pub async fn execute_hook(&self, name: &str, mut context: HookContext) -> HookResult {
        context.insert("hook", Value::String(name.to_string()));

        let entries = self.hooks_config.get(name).cloned().unwrap_or_default();
        let mut last_data = Map::new();

        for entry in &entries {
            let result = self.run_one(&entry.script, &context, &entry.params).await;

            if result.is_error() {
                if name != "error" {
                    self.run_error_chain(name, &entry.script, &result, &context).await;
                }
                return HookResult {
                    status: Some(HookStatus::Error),
                    data: last_data,
                    error: result.error,
                    modify_context: context.into_map(),
                    message: result.message,
                };
            }

            if !result.modify_context.is_empty() {
                context.merge(&result.modify_context);
            }
            if !result.data.is_empty() {
                last_data = result.data;
            }
        }

        HookResult {
            status: Some(HookStatus::Success),
            data: last_data,
            error: None,
            modify_context: context.into_map(),
            message: None,
        }
    }

    /// Error hook failures are silently swallowed and never recurse into
    /// another error-hook invocation.
    async fn run_error_chain(&self, failing_hook: &str, failing_script: &str, result: &HookResult, context: &HookContext) {
        let mut error_ctx = context.clone();
        error_ctx.insert("hook", Value::String("error".to_string()));
        error_ctx.insert(
            "error_type",
            result.error.as_ref().map(|e| e.code.clone()).unwrap_or_default(),
        );
        error_ctx.insert(
            "error_message",
            result.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
        );
        error_ctx.insert("error_code", result.error.as_ref().map(|e| e.code.clone()).unwrap_or_default());
        error_ctx.insert("hook_name", Value::String(failing_hook.to_string()));
        error_ctx.insert("failing_script", Value::String(failing_script.to_string()));
        error_ctx.insert("timestamp", Value::String(Utc::now().to_rfc3339()));

        self.notify_error_sink(&error_ctx).await;

        let entries = self.hooks_config.get("error").cloned().unwrap_or_default();
        for entry in &entries {
            let _ = self.run_one(&entry.script, &error_ctx, &entry.params).await;
        }
    }

    /// Best-effort external error-log sink notification. A missing sink (the
    /// common case — no `log_error` built-in registered) is not an error.
    async fn notify_error_sink(&self, error_ctx: &HookContext) {
        if let Some(sink) = self.builtins.get("log_error") {
            let _ = sink.run(error_ctx, &Map::new()).await;
        }
    }
}
