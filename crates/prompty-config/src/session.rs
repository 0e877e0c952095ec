//! Per-prompt UI session state — `session.yaml`, a sidecar file next to
//! `jobs.yaml`. Not consumed by the engine; only the external API reads and
//! writes it, merging one prompt's state in on every save.

use prompty_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ShortlistSource {
    pub block: String,
    #[serde(default)]
    pub combo: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ShortlistItem {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<ShortlistSource>,
}

/// One prompt's UI state. Every field is independently optional — a save
/// only ever carries the fields the client sent, and fields absent from the
/// posted patch keep their previously-saved value (see [`save_prompt_state`]).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PromptState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_values: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_operation: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortlist: Option<Vec<ShortlistItem>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Session {
    #[serde(default)]
    pub prompts: HashMap<String, PromptState>,
}

fn session_path(job_dir: &Path) -> std::path::PathBuf {
    job_dir.join("session.yaml")
}

/// Read `session.yaml`. A missing or unparseable file reads back as an
/// empty session rather than an error — session state is advisory.
pub fn read_session(job_dir: &Path) -> Session {
    let path = session_path(job_dir);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return Session::default();
    };
    serde_yaml::from_str(&raw).unwrap_or_default()
}

/// Merge-update one prompt's state into `session.yaml` and write it back.
/// Fields not present on `patch` leave the existing saved value untouched;
/// `patch.active_operation == Some(None)` explicitly clears it (distinct
/// from the field being entirely absent).
pub fn save_prompt_state(job_dir: &Path, prompt_id: &str, patch: PromptState) -> Result<()> {
    let mut session = read_session(job_dir);
    let entry = session.prompts.entry(prompt_id.to_string()).or_default();

    if patch.composition.is_some() {
        entry.composition = patch.composition;
    }
    if patch.locked_values.is_some() {
        entry.locked_values = patch.locked_values;
    }
    if patch.active_operation.is_some() {
        entry.active_operation = patch.active_operation;
    }
    if patch.shortlist.is_some() {
        entry.shortlist = patch.shortlist;
    }

    let yaml = serde_yaml::to_string(&session)?;
    std::fs::write(session_path(job_dir), yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_file_reads_back_empty() {
        let dir = tempfile::tempdir().unwrap();
        let session = read_session(dir.path());
        assert!(session.prompts.is_empty());
    }

    #[test]
    fn save_then_read_round_trips_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        save_prompt_state(
            dir.path(),
            "p1",
            PromptState { composition: Some(3), ..Default::default() },
        )
        .unwrap();
        save_prompt_state(
            dir.path(),
            "p1",
            PromptState { active_operation: Some(Some("role-swap".to_string())), ..Default::default() },
        )
        .unwrap();

        let session = read_session(dir.path());
        let state = &session.prompts["p1"];
        assert_eq!(state.composition, Some(3));
        assert_eq!(state.active_operation, Some(Some("role-swap".to_string())));
    }
}
