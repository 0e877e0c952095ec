//! The flat `JobRecord` — the expander's output unit, one per composition.

use crate::document::HookConfig;
use prompty_core::BlockPath;
use prompty_loras::LoraConfig;
use prompty_resolver::WildcardUsage;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, Serialize)]
pub struct Params {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PromptResult {
    pub id: String,
    pub text: String,
    pub template: String,
    pub annotations: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct JobRecord {
    pub prompt: PromptResult,
    pub loras: Vec<LoraConfig>,
    pub filename_suffix: String,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub params: Params,
    pub sampler_params: Map<String, Value>,
    pub original_index: usize,
    pub block_path: BlockPath,
    pub parent_path: Option<BlockPath>,
    pub depends_on: Vec<String>,
    pub wildcard_usage: WildcardUsage,
    pub ext_indices: HashMap<String, usize>,
    pub is_leaf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_expressions: Option<[String; 2]>,
    /// This prompt's fully-merged hook dispatch table (selected mods ->
    /// `defaults.hooks` -> prompt `hooks` overrides), resolved once at
    /// expansion time. Identical for every composition of the same block.
    #[serde(skip)]
    pub hooks_config: HookConfig,
}

impl JobRecord {
    /// Signature used to sort the final list for LoRA-loading locality.
    pub fn lora_signature(&self) -> String {
        prompty_loras::lora_signature(&self.loras)
    }
}
