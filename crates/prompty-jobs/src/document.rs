//! Job document schema — the declarative shape a `jobs.yaml` file
//! deserializes into.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JobDocument {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub loras: Vec<LoraLibraryDef>,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub prompts: Vec<PromptEntry>,
    /// Named global mod bundles, each itself a hook-name -> script-list
    /// fragment; selected per-prompt via `PromptEntry::mods`. In modern
    /// usage a mod is declared inline under a hook name instead, so this is
    /// commonly empty.
    #[serde(default)]
    pub mods: HashMap<String, HookConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub ext_text_max: i64,
    #[serde(default)]
    pub wildcards_max: i64,
    #[serde(default = "default_delimiter")]
    pub prompts_delimiter: String,
    #[serde(default = "default_trigger_delimiter")]
    pub trigger_delimiter: String,
    #[serde(default)]
    pub hooks: HookConfig,
}

fn default_delimiter() -> String {
    ", ".to_string()
}

fn default_trigger_delimiter() -> String {
    ", ".to_string()
}

/// Maps a hook name to its ordered list of scripts. A `null` entry at a
/// given key (represented here by the key being present with an empty
/// array after merge) removes that stage for a prompt — see
/// [`crate::hooks_merge::merge_hooks`] in `prompty-hooks`.
pub type HookConfig = HashMap<String, Vec<HookEntry>>;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HookEntry {
    pub script: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoraLibraryDef {
    pub alias: String,
    pub name: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub triggers: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_from_defaults: bool,
}

fn default_strength() -> f64 {
    1.0
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Model {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sampler: SamplerSpec,
}

/// Sampler configuration accepted at `model.sampler`: absent, a single
/// config, or a list of configs (each itself permutable via list-valued
/// params such as `shift: [1.0, 1.5]`).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SamplerSpec {
    #[default]
    None,
    One(SamplerConfig),
    Many(Vec<SamplerConfig>),
}

impl SamplerSpec {
    pub fn as_list(&self) -> Vec<SamplerConfig> {
        match self {
            SamplerSpec::None => vec![SamplerConfig::default()],
            SamplerSpec::One(s) => vec![s.clone()],
            SamplerSpec::Many(v) => {
                if v.is_empty() {
                    vec![SamplerConfig::default()]
                } else {
                    v.clone()
                }
            }
        }
    }
}

/// A single sampler config: either a bare name string or a structured
/// mapping. `extra` carries any key that isn't a recognised fixed param
/// (those become `sampler_params`).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SamplerConfig {
    #[default]
    Empty,
    Name(String),
    Structured(Map<String, Value>),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PromptEntry {
    pub id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub ext_text_max: Option<i64>,
    #[serde(default)]
    pub wildcards_max: Option<i64>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub wildcards: Vec<prompty_resolver::WildcardDef>,
    #[serde(default)]
    pub loras: Vec<String>,
    #[serde(default)]
    pub text: Value,
    #[serde(default)]
    pub annotations: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub hooks: HashMap<String, Option<Vec<HookEntry>>>,
    #[serde(default)]
    pub checkpoint: Option<bool>,
    #[serde(default)]
    pub resolutions: Vec<[String; 2]>,
    #[serde(default)]
    pub mods: ModsSelection,
}

/// Selects which named entries of the document-level `mods` registry apply
/// to this prompt. `enable` empty means "every mod not explicitly
/// disabled"; a non-empty `enable` is an allow-list.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ModsSelection {
    #[serde(default)]
    pub enable: Vec<String>,
    #[serde(default)]
    pub disable: Vec<String>,
}

/// A node of the nested `content` / `ext_text` / `after` text tree.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TextNode {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub ext_text: Option<String>,
    #[serde(default)]
    pub after: Vec<TextNode>,
    #[serde(default)]
    pub checkpoint: Option<bool>,
    #[serde(default)]
    pub annotations: Map<String, Value>,
}
