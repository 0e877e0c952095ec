//! The tree executor: a depth-first, single-cursor scheduler over the
//! pre-built queue. Owns every block's live state, the `resolve` cache, the
//! artifact buffers, and the manifest; drives the hook pipeline one
//! composition at a time and emits typed events as it goes.

use crate::artifact::{Artifact, ArtifactStore};
use crate::block::{build_block_table, build_children_index, BlockTable};
use crate::manifest::Manifest;
use crate::queue::{build_queue, QueueEntry};
use crate::stats::{FailedBlockDetail, RunStats};
use crate::state::{BlockState, RunState};
use prompty_core::BlockPath;
use prompty_events::{EventBus, PipelineEvent};
use prompty_hooks::{BuiltinRegistry, HookContext, HookPipeline};
use prompty_jobs::JobRecord;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub struct Executor {
    blocks: BlockTable,
    children_index: HashMap<BlockPath, Vec<BlockPath>>,
    queue: Vec<QueueEntry>,
    queue_position: usize,

    job_dir: PathBuf,
    project_root: PathBuf,
    builtins: BuiltinRegistry,
    // One pipeline per block, built from that block's own merged
    // `hooks_config` the first time the block is visited. Different blocks
    // in the same run can carry entirely different hook chains (per-prompt
    // `mods`/`hooks` overrides), so a single shared pipeline would be wrong.
    pipelines: HashMap<BlockPath, HookPipeline>,
    events: EventBus,
    artifact_store: ArtifactStore,

    visited_blocks: HashSet<BlockPath>,
    block_states: HashMap<BlockPath, BlockState>,
    block_completed: HashMap<BlockPath, usize>,
    failed_blocks: HashSet<BlockPath>,
    blocked_blocks: HashSet<BlockPath>,
    resolve_cache: HashMap<BlockPath, Map<String, Value>>,
    block_artifacts: HashMap<BlockPath, Vec<Artifact>>,
    composition_results: HashMap<String, Map<String, Value>>,
    stage_times: HashMap<BlockPath, HashMap<String, Vec<u64>>>,
    failure_messages: HashMap<BlockPath, String>,

    cancel: CancellationToken,
    total_compositions: usize,
    completed_compositions: usize,
}

impl Executor {
    pub fn new(
        jobs: Vec<JobRecord>,
        job_dir: PathBuf,
        project_root: PathBuf,
        builtins: BuiltinRegistry,
        events: EventBus,
        artifact_store: ArtifactStore,
    ) -> Self {
        let blocks = build_block_table(jobs);
        let children_index = build_children_index(&blocks);
        let queue = build_queue(&blocks);
        let total_compositions = queue.len();

        Self {
            blocks,
            children_index,
            queue,
            queue_position: 0,
            job_dir,
            project_root,
            builtins,
            pipelines: HashMap::new(),
            events,
            artifact_store,
            visited_blocks: HashSet::new(),
            block_states: HashMap::new(),
            block_completed: HashMap::new(),
            failed_blocks: HashSet::new(),
            blocked_blocks: HashSet::new(),
            resolve_cache: HashMap::new(),
            block_artifacts: HashMap::new(),
            composition_results: HashMap::new(),
            stage_times: HashMap::new(),
            failure_messages: HashMap::new(),
            cancel: CancellationToken::new(),
            total_compositions,
            completed_compositions: 0,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn queue_position(&self) -> usize {
        self.queue_position
    }

    /// Build this block's `HookPipeline` from its job's merged `hooks_config`
    /// the first time the block is touched. Every subsequent composition of
    /// the same block reuses the cached pipeline (and its script cache).
    fn ensure_pipeline(&mut self, block_path: &BlockPath, job: &JobRecord) {
        if self.pipelines.contains_key(block_path) {
            return;
        }
        let pipeline = HookPipeline::new(self.job_dir.clone(), self.project_root.clone(), job.hooks_config.clone())
            .with_builtins(self.builtins.clone());
        self.pipelines.insert(block_path.clone(), pipeline);
    }

    /// Run the queue to completion, a failure, or a cooperative stop.
    /// `resume()` is the same call re-entered from the preserved cursor.
    pub async fn execute(&mut self, job_id: &str, prompt_id: Option<&str>) -> RunStats {
        if self.queue_position == 0 {
            let mut paths: Vec<BlockPath> = self.blocks.keys().cloned().collect();
            paths.sort();
            self.events.emit(PipelineEvent::Init {
                job_id: job_id.to_string(),
                prompt_id: prompt_id.map(str::to_string),
                block_paths: paths,
                total_jobs: self.total_compositions,
            });
        }

        let run_state = loop {
            if self.queue_position >= self.queue.len() {
                break RunState::Complete;
            }
            if self.cancel.is_cancelled() {
                break RunState::Paused;
            }

            self.process_entry(self.queue_position).await;
            self.queue_position += 1;
        };

        let stats = self.build_stats(run_state);
        self.events.emit(PipelineEvent::RunComplete { stats: stats.to_json_map() });
        stats
    }

    async fn process_entry(&mut self, position: usize) {
        let entry = self.queue[position].clone();
        let block_path = entry.block_path.clone();

        if self.failed_blocks.contains(&block_path) || self.blocked_blocks.contains(&block_path) {
            return;
        }

        if let Some(parent_key) = &entry.parent_key {
            if let Some((parent_path, _)) = parent_key.split_once(':') {
                let parent_path = BlockPath::new(parent_path);
                if self.failed_blocks.contains(&parent_path) {
                    self.mark_blocked(&block_path);
                    return;
                }
            }
        }

        let first_visit = !self.visited_blocks.contains(&block_path);

        if first_visit {
            let depends_on = self.blocks.get(&block_path).map(|b| b.depends_on.clone()).unwrap_or_default();
            for dep in &depends_on {
                let dep_path = BlockPath::new(dep.as_str());
                if self.failed_blocks.contains(&dep_path) {
                    self.mark_blocked(&block_path);
                    return;
                }
            }
        }

        let compositions = self.blocks.get(&block_path).map(|b| b.compositions).unwrap_or(0);
        let job = match self.blocks.get(&block_path).and_then(|b| b.jobs.get(entry.composition_idx)) {
            Some(job) => job.clone(),
            None => return,
        };

        if first_visit {
            self.ensure_pipeline(&block_path, &job);
            self.visited_blocks.insert(block_path.clone());
            self.block_states.insert(block_path.clone(), BlockState::Running);
            self.events.emit(PipelineEvent::BlockStart { block_path: block_path.clone() });

            let prelude_ctx = self.build_context(&entry, &job, compositions, None);
            if !self.run_and_time("node_start", prelude_ctx, &block_path).await {
                self.fail_block(&block_path, "node_start hook failed");
                return;
            }

            let resolve_ctx = self.build_context(&entry, &job, compositions, None);
            let resolve_result = self.run_hook_timed("resolve", resolve_ctx, &block_path).await;
            if resolve_result.is_success() {
                self.resolve_cache.insert(block_path.clone(), resolve_result.data);
            } else {
                self.fail_block(&block_path, "resolve hook failed");
                return;
            }
        }

        let resolve_data = self.resolve_cache.get(&block_path).cloned();
        let mut context = self.build_context(&entry, &job, compositions, resolve_data);

        let mut combined_data = Map::new();
        for stage in ["pre", "generate", "post"] {
            let result = self.run_hook_timed(stage, context.clone(), &block_path).await;
            if !result.is_success() {
                let message = result
                    .error
                    .map(|e| e.message)
                    .or(result.message)
                    .unwrap_or_else(|| format!("{stage} hook failed"));
                self.fail_block(&block_path, &message);
                return;
            }
            if !result.modify_context.is_empty() {
                context.merge(&result.modify_context);
            }
            for (k, v) in result.data {
                combined_data.insert(k, v);
            }
        }

        let artifacts = self.extract_artifacts(&combined_data, &block_path, entry.composition_idx);
        for artifact in &artifacts {
            self.events.emit(PipelineEvent::Artifact {
                block_path: block_path.clone(),
                composition_idx: entry.composition_idx,
                artifact: serde_json::to_value(artifact).unwrap_or(Value::Null),
            });
        }
        self.block_artifacts.entry(block_path.clone()).or_default().extend(artifacts);

        let key = format!("{block_path}:{}", entry.composition_idx);
        self.composition_results.insert(key, combined_data);

        let completed = self.block_completed.entry(block_path.clone()).or_insert(0);
        *completed += 1;
        let block_completed_count = *completed;
        self.completed_compositions += 1;

        self.events.emit(PipelineEvent::CompositionComplete {
            block_path: block_path.clone(),
            composition_idx: entry.composition_idx,
            block_completed: block_completed_count,
            block_total: compositions,
            global_completed: self.completed_compositions,
            global_total: self.total_compositions,
        });

        if block_completed_count >= compositions {
            self.complete_block(&block_path).await;
        }
    }

    async fn run_and_time(&mut self, stage: &str, context: HookContext, block_path: &BlockPath) -> bool {
        self.run_hook_timed(stage, context, block_path).await.is_success()
    }

    /// Drive one named hook stage through the pipeline and record the
    /// elapsed time under `stage_times[block_path][stage]`. The executor
    /// never starts the next composition until this resolves — scripts run
    /// one at a time, a single-threaded cooperative model even though the
    /// call itself is `async` (external hook scripts are spawned as child
    /// processes via tokio).
    async fn run_hook_timed(&mut self, stage: &str, context: HookContext, block_path: &BlockPath) -> prompty_hooks::HookResult {
        let start = std::time::Instant::now();
        let result = match self.pipelines.get(block_path) {
            Some(pipeline) => pipeline.execute_hook(stage, context).await,
            None => prompty_hooks::HookResult::bare_success(),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.stage_times
            .entry(block_path.clone())
            .or_default()
            .entry(stage.to_string())
            .or_default()
            .push(elapsed_ms);
        self.events.emit(PipelineEvent::Stage {
            block_path: block_path.clone(),
            stage: stage.to_string(),
            time_ms: elapsed_ms,
            success: result.is_success(),
        });
        result
    }

    fn extract_artifacts(&self, data: &Map<String, Value>, block_path: &BlockPath, composition_idx: usize) -> Vec<Artifact> {
        match data.get("artifacts").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .filter_map(|v| Artifact::from_value(v, block_path, composition_idx))
                .collect(),
            None => Vec::new(),
        }
    }

    fn build_context(
        &self,
        entry: &QueueEntry,
        job: &JobRecord,
        compositions: usize,
        resolve_data: Option<Map<String, Value>>,
    ) -> HookContext {
        let parent_result = entry
            .parent_key
            .as_ref()
            .and_then(|k| self.composition_results.get(k))
            .map(|m| Value::Object(m.clone()))
            .unwrap_or(Value::Null);

        let depends_on = self.blocks.get(&entry.block_path).map(|b| b.depends_on.clone()).unwrap_or_default();
        let mut upstream_artifacts = Map::new();
        for dep in &depends_on {
            let dep_path = BlockPath::new(dep.as_str());
            let artifacts = self.block_artifacts.get(&dep_path).cloned().unwrap_or_default();
            upstream_artifacts.insert(
                dep.clone(),
                serde_json::to_value(artifacts).unwrap_or(Value::Array(Vec::new())),
            );
        }

        let mut block_states = Map::new();
        for (path, state) in &self.block_states {
            block_states.insert(path.as_str().to_string(), Value::String(state.as_str().to_string()));
        }

        let mut block_completed = Map::new();
        for (path, count) in &self.block_completed {
            block_completed.insert(path.as_str().to_string(), Value::from(*count));
        }

        let mut ctx = HookContext::new();
        ctx.insert("block_path", Value::String(entry.block_path.as_str().to_string()));
        ctx.insert(
            "parent_path",
            entry.block_path.parent().map(|p| Value::String(p.as_str().to_string())).unwrap_or(Value::Null),
        );
        ctx.insert("is_leaf", Value::Bool(job.is_leaf));
        ctx.insert("block_depth", Value::from(entry.block_path.depth()));
        ctx.insert("composition_index", Value::from(entry.composition_idx));
        ctx.insert("composition_total", Value::from(compositions));
        ctx.insert("resolved_text", Value::String(job.prompt.text.clone()));
        ctx.insert("prompt_id", Value::String(job.prompt.id.clone()));
        ctx.insert("job", serde_json::to_value(job).unwrap_or(Value::Null));
        ctx.insert("parent_result", parent_result);
        ctx.insert("resolve_data", resolve_data.map(Value::Object).unwrap_or(Value::Null));
        ctx.insert("annotations", Value::Object(job.prompt.annotations.clone()));
        ctx.insert("meta", Value::Object(Map::new()));
        ctx.insert("upstream_artifacts", Value::Object(upstream_artifacts));
        ctx.insert("block_states", Value::Object(block_states));
        ctx.insert("block_completed", Value::Object(block_completed));
        ctx
    }

    fn fail_block(&mut self, block_path: &BlockPath, message: &str) {
        self.failed_blocks.insert(block_path.clone());
        self.block_states.insert(block_path.clone(), BlockState::Failed);
        self.failure_messages.insert(block_path.clone(), message.to_string());
        self.events.emit(PipelineEvent::BlockFailed { block_path: block_path.clone(), error: message.to_string() });
        self.cascade_block(block_path);
    }

    fn mark_blocked(&mut self, block_path: &BlockPath) {
        if self.blocked_blocks.insert(block_path.clone()) {
            self.block_states.insert(block_path.clone(), BlockState::Blocked);
            self.events.emit(PipelineEvent::BlockBlocked { block_path: block_path.clone() });
        }
    }

    /// Recursively block every descendant (parent -> child) and every
    /// dependent (`block_path` named in another block's `depends_on`) of a
    /// failed block. Already-produced artifacts from completed compositions
    /// of the failed block are never discarded.
    fn cascade_block(&mut self, block_path: &BlockPath) {
        let mut to_block: Vec<BlockPath> = Vec::new();

        if let Some(children) = self.children_index.get(block_path) {
            to_block.extend(children.iter().cloned());
        }
        for block in self.blocks.values() {
            if block.depends_on.iter().any(|d| d.as_str() == block_path.as_str()) {
                to_block.push(block.path.clone());
            }
        }

        for dependent in to_block {
            if self.failed_blocks.contains(&dependent) || self.blocked_blocks.contains(&dependent) {
                continue;
            }
            self.mark_blocked(&dependent);
            self.cascade_block(&dependent);
        }
    }

    async fn complete_block(&mut self, block_path: &BlockPath) {
        let node_end_ctx = {
            let mut ctx = HookContext::new();
            ctx.insert("block_path", Value::String(block_path.as_str().to_string()));
            ctx.insert(
                "parent_path",
                block_path.parent().map(|p| Value::String(p.as_str().to_string())).unwrap_or(Value::Null),
            );
            ctx.insert("block_depth", Value::from(block_path.depth()));
            if let Some(block) = self.blocks.get(block_path) {
                ctx.insert("composition_total", Value::from(block.compositions));
            }
            ctx
        };
        self.run_hook_timed("node_end", node_end_ctx, block_path).await;

        self.block_states.insert(block_path.clone(), BlockState::Complete);

        let mut artifacts = self.block_artifacts.remove(block_path).unwrap_or_default();
        let flushed = self.artifact_store.flush_block(block_path, &mut artifacts);
        let artifacts_count = artifacts.len();
        self.block_artifacts.insert(block_path.clone(), artifacts);

        if let Err(e) = &flushed {
            tracing::warn!(block_path = %block_path, error = %e, "failed to flush block artifacts to disk");
        }

        self.write_manifest();

        for block in self.blocks.values() {
            if block.depends_on.iter().any(|d| d.as_str() == block_path.as_str()) {
                let count = self.block_artifacts.get(block_path).map(|a| a.len()).unwrap_or(0);
                self.events.emit(PipelineEvent::ArtifactConsumed {
                    consuming_block: block.path.clone(),
                    source_block: block_path.clone(),
                    artifact_count: count,
                });
            }
        }

        let stage_times = self.stage_times.get(block_path).cloned().unwrap_or_default();
        self.events.emit(PipelineEvent::BlockComplete {
            block_path: block_path.clone(),
            stage_times,
            artifacts_count,
        });
    }

    fn write_manifest(&self) {
        let blocks_complete = self.block_states.values().filter(|s| matches!(s, BlockState::Complete)).count();
        let mut manifest = Manifest::new(now_unix(), blocks_complete, self.blocks.len());
        for block in self.blocks.values() {
            let artifacts = self.block_artifacts.get(&block.path).cloned().unwrap_or_default();
            manifest.set_block(&block.path, artifacts, block.depends_on.clone(), block.compositions);
        }
        if let Err(e) = manifest.write(self.artifact_store.output_path()) {
            tracing::warn!(error = %e, "failed to write manifest.json");
        }
    }

    fn build_stats(&self, run_state: RunState) -> RunStats {
        let blocks_total = self.blocks.len();
        let blocks_complete = self.block_states.values().filter(|s| matches!(s, BlockState::Complete)).count();
        let blocks_blocked = self.blocked_blocks.len();

        let mut blocks_failed = HashMap::new();
        for path in &self.failed_blocks {
            let total = self.blocks.get(path).map(|b| b.compositions).unwrap_or(0);
            let completed = self.block_completed.get(path).copied().unwrap_or(0);
            blocks_failed.insert(path.as_str().to_string(), FailedBlockDetail { completed, total });
        }

        let mut artifacts_by_block = HashMap::new();
        let mut artifacts_total = 0;
        for (path, artifacts) in &self.block_artifacts {
            artifacts_by_block.insert(path.as_str().to_string(), artifacts.len());
            artifacts_total += artifacts.len();
        }

        let state = if !self.failed_blocks.is_empty() && run_state == RunState::Complete {
            RunState::Failed
        } else {
            run_state
        };

        RunStats {
            state,
            total_compositions: self.total_compositions,
            completed_compositions: self.completed_compositions,
            queue_position: self.queue_position,
            blocks_total,
            blocks_complete,
            blocks_failed,
            blocks_blocked,
            artifacts_total,
            artifacts_by_block,
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
