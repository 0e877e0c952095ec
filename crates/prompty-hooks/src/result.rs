//! `HookResult` — the tagged outcome every script, builtin or external,
//! resolves to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    Success,
    Error,
    Skip,
    Streaming,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HookError {
    pub code: String,
    pub message: String,
}

impl HookError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }

    pub fn script_not_found(script: &str) -> Self {
        Self::new("SCRIPT_NOT_FOUND", format!("hook script not found: {script}"))
    }

    pub fn no_execute_func(script: &str) -> Self {
        Self::new("NO_EXECUTE_FUNC", format!("hook script has no entry point: {script}"))
    }
}

/// A single script's (or the whole chain's) normalised outcome.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HookResult {
    #[serde(default = "default_status")]
    pub status: Option<HookStatus>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub error: Option<HookError>,
    #[serde(default)]
    pub modify_context: Map<String, Value>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_status() -> Option<HookStatus> {
    None
}

impl HookResult {
    /// A bare, empty return value is treated as success per the pipeline contract.
    pub fn bare_success() -> Self {
        Self { status: Some(HookStatus::Success), ..Default::default() }
    }

    pub fn success(data: Map<String, Value>) -> Self {
        Self { status: Some(HookStatus::Success), data, ..Default::default() }
    }

    pub fn error(err: HookError) -> Self {
        Self { status: Some(HookStatus::Error), error: Some(err), ..Default::default() }
    }

    pub fn skip() -> Self {
        Self { status: Some(HookStatus::Skip), ..Default::default() }
    }

    /// True for `Success`, `Skip`, and `Streaming` — only `Error` (or a
    /// missing status treated as success-by-default) halts the chain.
    pub fn is_success(&self) -> bool {
        !matches!(self.status, Some(HookStatus::Error))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, Some(HookStatus::Error))
    }
}
