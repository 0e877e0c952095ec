//! Depth-first, single-cursor tree executor: the runtime that drives every
//! composition of every block through its hook lifecycle, tracks cross-block
//! dependencies and failure cascades, and flushes artifacts to disk.

pub mod artifact;
pub mod block;
pub mod executor;
pub mod manifest;
pub mod queue;
pub mod state;
pub mod stats;

pub use artifact::{Artifact, ArtifactKind, ArtifactStore, FlushSummary};
pub use block::{build_block_table, build_children_index, find_roots, Block, BlockTable};
pub use executor::Executor;
pub use manifest::{remove_lock, touch_lock, Manifest, ManifestBlockEntry, ManifestRun};
pub use queue::{build_queue, QueueEntry};
pub use state::{BlockState, RunState};
pub use stats::{FailedBlockDetail, RunStats};

#[cfg(test)]
mod tests {
    use super::*;
    use prompty_events::EventBus;
    use prompty_hooks::BuiltinRegistry;
    use prompty_jobs::{HookConfig, JobRecord, Params, PromptResult};
    use prompty_loras::LoraConfig;
    use prompty_resolver::WildcardUsage;
    use serde_json::Map;
    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;

    fn record(
        block_path: &str,
        parent: Option<&str>,
        depends_on: Vec<&str>,
        prompt_id: &str,
        text: &str,
    ) -> JobRecord {
        record_with_hooks(block_path, parent, depends_on, prompt_id, text, StdHashMap::new())
    }

    fn record_with_hooks(
        block_path: &str,
        parent: Option<&str>,
        depends_on: Vec<&str>,
        prompt_id: &str,
        text: &str,
        hooks_config: HookConfig,
    ) -> JobRecord {
        JobRecord {
            prompt: PromptResult {
                id: prompt_id.to_string(),
                text: text.to_string(),
                template: text.to_string(),
                annotations: Map::new(),
            },
            loras: Vec::<LoraConfig>::new(),
            filename_suffix: String::new(),
            sampler: None,
            scheduler: None,
            params: Params::default(),
            sampler_params: Map::new(),
            original_index: 1,
            block_path: prompty_core::BlockPath::new(block_path),
            parent_path: parent.map(prompty_core::BlockPath::new),
            depends_on: depends_on.into_iter().map(str::to_string).collect(),
            wildcard_usage: WildcardUsage::new(),
            ext_indices: StdHashMap::new(),
            is_leaf: true,
            resolution_expressions: None,
            hooks_config,
        }
    }

    #[tokio::test]
    async fn single_composition_runs_to_completion_with_no_configured_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![record("0", None, vec![], "p1", "hello")];
        let store = ArtifactStore::new(dir.path().to_path_buf());
        let mut executor = Executor::new(
            jobs,
            PathBuf::from("/tmp/job"),
            PathBuf::from("/tmp/project"),
            BuiltinRegistry::default(),
            EventBus::default(),
            store,
        );

        let stats = executor.execute("job1", Some("p1")).await;
        assert_eq!(stats.state, RunState::Complete);
        assert_eq!(stats.completed_compositions, 1);
        assert_eq!(stats.blocks_complete, 1);
        assert!(stats.blocks_failed.is_empty());
    }

    #[tokio::test]
    async fn dependency_block_runs_after_its_dependency_completes() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = vec![
            record("0", None, vec![], "a", "A"),
            record("1", None, vec!["0"], "b", "B"),
        ];
        let store = ArtifactStore::new(dir.path().to_path_buf());
        let mut executor = Executor::new(
            jobs,
            PathBuf::from("/tmp/job"),
            PathBuf::from("/tmp/project"),
            BuiltinRegistry::default(),
            EventBus::default(),
            store,
        );
        let stats = executor.execute("job1", None).await;
        assert_eq!(stats.state, RunState::Complete);
        assert_eq!(stats.blocks_complete, 2);
    }

    #[tokio::test]
    async fn missing_script_fails_block_and_blocks_dependent() {
        let dir = tempfile::tempdir().unwrap();
        let mut hooks_config: HookConfig = StdHashMap::new();
        hooks_config.insert(
            "pre".to_string(),
            vec![prompty_jobs::HookEntry { script: "does/not/exist.py".to_string(), params: Map::new() }],
        );

        let jobs = vec![
            record("0", None, vec![], "a", "A"),
            record_with_hooks("0.0", Some("0"), vec!["0"], "b", "B", hooks_config),
        ];
        let store = ArtifactStore::new(dir.path().to_path_buf());
        let mut executor = Executor::new(
            jobs,
            PathBuf::from("/tmp/job"),
            PathBuf::from("/tmp/project"),
            BuiltinRegistry::default(),
            EventBus::default(),
            store,
        );
        let stats = executor.execute("job1", None).await;

        assert_eq!(stats.blocks_failed.len(), 1);
        assert_eq!(stats.blocks_blocked, 1);
    }
}
