//! End-to-end fixture: a job document on disk, through expansion and
//! execution, to a written manifest — the full path the `prompty` binary
//! itself drives.

use prompty_executor::{ArtifactStore, Executor, RunState};
use prompty_hooks::BuiltinRegistry;
use prompty_jobs::expand_job;
use std::fs;

fn write_job(workspace: &std::path::Path, job_id: &str, yaml: &str) {
    let dir = workspace.join("jobs").join(job_id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("jobs.yaml"), yaml).unwrap();
}

#[tokio::test]
async fn single_prompt_with_wildcards_expands_and_runs_to_completion() {
    let workspace = tempfile::tempdir().unwrap();
    write_job(
        workspace.path(),
        "demo",
        r#"
prompts:
  - id: scene
    wildcards:
      - name: color
        text: ["red", "blue"]
    text: "a __color__ car"
"#,
    );

    let (doc, _raw) = prompty_config::load_job(workspace.path(), "demo").unwrap();
    let extensions = prompty_config::load_extension_table(workspace.path(), "demo").unwrap();
    let cfg = prompty_jobs::ExpanderConfig {
        lora_root: "/loras",
        range_increment: 0.1,
        default_params: serde_json::Map::new(),
    };
    let records = expand_job(&doc, &extensions, &cfg, 1).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.prompt.text == "a red car"));
    assert!(records.iter().any(|r| r.prompt.text == "a blue car"));

    let artifacts_dir = workspace.path().join("jobs/demo/_artifacts");
    let store = ArtifactStore::new(artifacts_dir.clone());
    let mut executor = Executor::new(
        records,
        workspace.path().join("jobs/demo"),
        workspace.path().to_path_buf(),
        BuiltinRegistry::default(),
        prompty_events::EventBus::default(),
        store,
    );

    let stats = executor.execute("demo", None).await;
    assert_eq!(stats.state, RunState::Complete);
    assert_eq!(stats.completed_compositions, 2);
    assert_eq!(stats.blocks_complete, 1);

    let manifest_raw = fs::read_to_string(artifacts_dir.join("manifest.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest_raw).unwrap();
    assert_eq!(manifest["version"], 3);
    assert_eq!(manifest["run"]["blocks_complete"], 1);
}

#[tokio::test]
async fn dependent_block_waits_for_its_dependency_across_a_real_job_document() {
    let workspace = tempfile::tempdir().unwrap();
    write_job(
        workspace.path(),
        "chain",
        r#"
prompts:
  - id: base
    text: "base text"
  - id: follow
    depends_on: ["0"]
    text: "follow text"
"#,
    );

    let (doc, _raw) = prompty_config::load_job(workspace.path(), "chain").unwrap();
    let extensions = prompty_config::load_extension_table(workspace.path(), "chain").unwrap();
    let cfg = prompty_jobs::ExpanderConfig {
        lora_root: "/loras",
        range_increment: 0.1,
        default_params: serde_json::Map::new(),
    };
    let records = expand_job(&doc, &extensions, &cfg, 1).unwrap();
    assert_eq!(records.len(), 2);

    let artifacts_dir = workspace.path().join("jobs/chain/_artifacts");
    let store = ArtifactStore::new(artifacts_dir.clone());
    let mut executor = Executor::new(
        records,
        workspace.path().join("jobs/chain"),
        workspace.path().to_path_buf(),
        BuiltinRegistry::default(),
        prompty_events::EventBus::default(),
        store,
    );

    let stats = executor.execute("chain", None).await;
    assert_eq!(stats.state, RunState::Complete);
    assert_eq!(stats.blocks_complete, 2);
    assert!(stats.blocks_failed.is_empty());
}

#[test]
fn invalid_job_document_is_reported_as_unparseable_without_panicking() {
    let workspace = tempfile::tempdir().unwrap();
    write_job(workspace.path(), "broken", "not: [valid yaml");

    let err = prompty_config::load_job(workspace.path(), "broken").unwrap_err();
    assert!(format!("{err}").len() > 0);
}
