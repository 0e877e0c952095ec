//! The typed event catalog the tree executor emits and both the CLI and the
//! HTTP/SSE gateway consume identically. Broadcast, not a log — a domain
//! protocol, built on an `OutputEvent`/`broadcast::Sender` pattern.

use prompty_core::BlockPath;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Subscribe to these events, consumed identically by stdout and SSE.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Init {
        job_id: String,
        prompt_id: Option<String>,
        block_paths: Vec<BlockPath>,
        total_jobs: usize,
    },
    BlockStart {
        block_path: BlockPath,
    },
    Stage {
        block_path: BlockPath,
        stage: String,
        time_ms: u64,
        success: bool,
    },
    Artifact {
        block_path: BlockPath,
        composition_idx: usize,
        artifact: Value,
    },
    CompositionComplete {
        block_path: BlockPath,
        composition_idx: usize,
        block_completed: usize,
        block_total: usize,
        global_completed: usize,
        global_total: usize,
    },
    ArtifactConsumed {
        consuming_block: BlockPath,
        source_block: BlockPath,
        artifact_count: usize,
    },
    BlockComplete {
        block_path: BlockPath,
        stage_times: HashMap<String, Vec<u64>>,
        artifacts_count: usize,
    },
    BlockFailed {
        block_path: BlockPath,
        error: String,
    },
    BlockBlocked {
        block_path: BlockPath,
    },
    RunComplete {
        stats: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

impl PipelineEvent {
    /// The SSE `event:` line name / CLI log tag for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Init { .. } => "init",
            PipelineEvent::BlockStart { .. } => "block_start",
            PipelineEvent::Stage { .. } => "stage",
            PipelineEvent::Artifact { .. } => "artifact",
            PipelineEvent::CompositionComplete { .. } => "composition_complete",
            PipelineEvent::ArtifactConsumed { .. } => "artifact_consumed",
            PipelineEvent::BlockComplete { .. } => "block_complete",
            PipelineEvent::BlockFailed { .. } => "block_failed",
            PipelineEvent::BlockBlocked { .. } => "block_blocked",
            PipelineEvent::RunComplete { .. } => "run_complete",
            PipelineEvent::Error { .. } => "error",
        }
    }

    /// Render just the `data:` payload (no `type` tag — the SSE frame line
    /// carries the name separately).
    pub fn data(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        value
    }
}

/// Owned by the tree executor; clone the sender out to every subscriber
/// (CLI printer, SSE handler). A slow/absent receiver never blocks the
/// executor — `send` on a zero-receiver channel is a cheap no-op error we
/// discard, and a lagging receiver just skips ahead on its next `recv`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(PipelineEvent::Error { message: "boom".to_string() });
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(PipelineEvent::BlockStart { block_path: BlockPath::root(0) });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "block_start");
    }

    #[test]
    fn data_payload_omits_type_tag() {
        let event = PipelineEvent::BlockBlocked { block_path: BlockPath::root(2) };
        let data = event.data();
        assert!(data.get("type").is_none());
        assert_eq!(data.get("block_path").and_then(Value::as_str), Some("2"));
    }
}
