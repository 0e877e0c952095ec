//! Job document parsing and expansion: turns one `jobs.yaml` document into
//! the flat, block-tagged [`JobRecord`] list the tree executor consumes.

mod document;
mod expand;
mod extends;
mod hooks_merge;
mod record;
mod text_tree;

pub use document::{
    Defaults, HookConfig, HookEntry, JobDocument, LoraLibraryDef, Model, ModsSelection, PromptEntry,
    SamplerConfig, SamplerSpec, TextNode,
};
pub use expand::{expand_job, ExpanderConfig};
pub use extends::{resolve_extends, ExtendsResult};
pub use hooks_merge::{merge_hook_config, select_mods};
pub use record::{JobRecord, Params, PromptResult};
pub use text_tree::{build_text_variations, Variation};

use prompty_core::Result;
use std::path::Path;

/// Parse a job document from YAML text.
pub fn parse_job_document(yaml: &str) -> Result<JobDocument> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load and parse a job document from disk.
pub fn load_job_document(path: &Path) -> Result<JobDocument> {
    let text = std::fs::read_to_string(path)?;
    parse_job_document(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prompty_extensions::ExtensionTable;
    use serde_json::Map;

    #[test]
    fn minimal_document_expands_to_one_record() {
        let yaml = r#"
prompts:
  - id: p1
    text: "a simple prompt"
"#;
        let doc = parse_job_document(yaml).unwrap();
        let extensions: ExtensionTable = Vec::new();
        let cfg = ExpanderConfig {
            lora_root: "/loras",
            range_increment: 0.05,
            default_params: Map::new(),
        };
        let records = expand_job(&doc, &extensions, &cfg, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt.text, "a simple prompt");
        assert_eq!(records[0].block_path.as_str(), "0");
        assert_eq!(records[0].original_index, 1);
    }

    #[test]
    fn skipped_prompt_is_excluded() {
        let yaml = r#"
prompts:
  - id: p1
    skip: true
    text: "hidden"
  - id: p2
    text: "visible"
"#;
        let doc = parse_job_document(yaml).unwrap();
        let extensions: ExtensionTable = Vec::new();
        let cfg = ExpanderConfig {
            lora_root: "/loras",
            range_increment: 0.05,
            default_params: Map::new(),
        };
        let records = expand_job(&doc, &extensions, &cfg, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt.text, "visible");
        assert_eq!(records[0].block_path.as_str(), "0");
    }

    #[test]
    fn sampler_list_with_structured_params_permutes() {
        let yaml = r#"
model:
  sampler:
    - name: euler
      scheduler: simple
      shift: [1.0, 1.5]
prompts:
  - id: p1
    text: "a prompt"
"#;
        let doc = parse_job_document(yaml).unwrap();
        let extensions: ExtensionTable = Vec::new();
        let cfg = ExpanderConfig {
            lora_root: "/loras",
            range_increment: 0.05,
            default_params: Map::new(),
        };
        let records = expand_job(&doc, &extensions, &cfg, 1).unwrap();
        assert_eq!(records.len(), 2);
        let shifts: Vec<_> = records.iter().map(|r| r.sampler_params.get("shift").cloned()).collect();
        assert!(shifts.iter().any(|v| v.as_ref().and_then(|v| v.as_f64()) == Some(1.0)));
        assert!(shifts.iter().any(|v| v.as_ref().and_then(|v| v.as_f64()) == Some(1.5)));
    }
}
