//! Built-in hooks — the handful of always-available stages that don't need
//! an external process. Shaped like a small tool registry: implement
//! [`BuiltinHook`], register it, look it up by name.

use crate::context::HookContext;
use crate::result::HookResult;
use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait BuiltinHook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, context: &HookContext, params: &Map<String, Value>) -> HookResult;
}

pub struct SkipHook;

#[async_trait]
impl BuiltinHook for SkipHook {
    fn name(&self) -> &str {
        "skip"
    }

    async fn run(&self, _context: &HookContext, _params: &Map<String, Value>) -> HookResult {
        HookResult::bare_success()
    }
}

pub struct LogHook;

#[async_trait]
impl BuiltinHook for LogHook {
    fn name(&self) -> &str {
        "log"
    }

    async fn run(&self, context: &HookContext, params: &Map<String, Value>) -> HookResult {
        let message = params.get("message").and_then(Value::as_str).unwrap_or("hook log");
        tracing::info!(hook = ?context.get("hook"), block_path = ?context.get("block_path"), %message, "hook log");
        HookResult::bare_success()
    }
}

#[derive(Clone)]
pub struct BuiltinRegistry {
    hooks: HashMap<String, Arc<dyn BuiltinHook>>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        let mut registry = Self { hooks: HashMap::new() };
        registry.register(SkipHook);
        registry.register(LogHook);
        registry
    }
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self { hooks: HashMap::new() }
    }

    pub fn register(&mut self, hook: impl BuiltinHook + 'static) {
        self.hooks.insert(hook.name().to_string(), Arc::new(hook));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BuiltinHook>> {
        self.hooks.get(name).cloned()
    }
}
