//! Script resolution and execution: the two kinds a `script:` reference can
//! name — a built-in, or an external-process script invoked with a
//! JSON-encoded `{context, params}` payload on stdin.

use crate::context::HookContext;
use crate::result::{HookError, HookResult, HookStatus};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Clone, Debug)]
pub enum ScriptRef {
    Builtin(String),
    External(PathBuf),
}

/// Resolve a raw `script:` string to one of the two kinds. `./`-prefixes are
/// stripped; a bare (non-builtin) path is looked up under the job directory
/// first, then the project root.
pub fn resolve_script(raw: &str, job_dir: &Path, project_root: &Path) -> Result<ScriptRef, HookError> {
    if let Some(name) = raw.strip_prefix("builtin:") {
        return Ok(ScriptRef::Builtin(name.to_string()));
    }

    let rel = raw.strip_prefix("./").unwrap_or(raw);
    let in_job_dir = job_dir.join(rel);
    if in_job_dir.exists() {
        return Ok(ScriptRef::External(in_job_dir));
    }
    let in_project_root = project_root.join(rel);
    if in_project_root.exists() {
        return Ok(ScriptRef::External(in_project_root));
    }
    Err(HookError::script_not_found(raw))
}

/// Run an external-process hook script: write `{context, params}` as JSON to
/// its stdin, read a JSON `HookResult` back from stdout. A non-zero exit,
/// spawn failure, or unparsable stdout all surface as hook-script errors —
/// never a panic and never a process crash of the host.
pub async fn run_external_script(
    path: &Path,
    context: &HookContext,
    params: &Map<String, Value>,
) -> HookResult {
    let payload = json!({ "context": context.to_value(), "params": Value::Object(params.clone()) });

    let mut child = match Command::new(path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return HookResult::error(HookError::new(
                "SCRIPT_SPAWN_FAILED",
                format!("failed to spawn hook script {}: {e}", path.display()),
            ))
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                return HookResult::error(HookError::new(
                    "SCRIPT_ENCODE_FAILED",
                    format!("failed to encode hook payload: {e}"),
                ))
            }
        };
        if let Err(e) = stdin.write_all(&bytes).await {
            return HookResult::error(HookError::new(
                "SCRIPT_SPAWN_FAILED",
                format!("failed to write to hook script stdin: {e}"),
            ));
        }
    }

    let output = match child.wait_with_output().await {
        Ok(output) => output,
        Err(e) => {
            return HookResult::error(HookError::new(
                "SCRIPT_SPAWN_FAILED",
                format!("hook script {} failed to run: {e}", path.display()),
            ))
        }
    };

    if !output.status.success() {
        tracing::warn!(
            script = %path.display(),
            code = ?output.status.code(),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "hook script exited non-zero"
        );
    }

    if String::from_utf8_lossy(&output.stdout).trim().is_empty() {
        return HookResult::bare_success();
    }

    match serde_json::from_slice::<HookResult>(&output.stdout) {
        Ok(mut result) => {
            if result.status.is_none() {
                result.status = Some(HookStatus::Success);
            }
            result
        }
        Err(_) => HookResult::error(HookError::no_execute_func(&path.display().to_string())),
    }
}
