//! Final run statistics, serialised into the `run_complete` event payload.

use crate::state::RunState;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, Serialize)]
pub struct FailedBlockDetail {
    pub completed: usize,
    pub total: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunStats {
    pub state: RunState,
    pub total_compositions: usize,
    pub completed_compositions: usize,
    pub queue_position: usize,
    pub blocks_total: usize,
    pub blocks_complete: usize,
    pub blocks_failed: HashMap<String, FailedBlockDetail>,
    pub blocks_blocked: usize,
    pub artifacts_total: usize,
    pub artifacts_by_block: HashMap<String, usize>,
}

impl RunStats {
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}
