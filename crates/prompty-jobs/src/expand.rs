//! Job expander — `build_jobs` equivalent. Runs extension/addon resolution,
//! nested text-tree expansion, and LoRA × sampler × resolution permutation
//! to produce the flat, block-tagged `JobRecord` list the tree executor
//! consumes.

use crate::document::{Defaults, HookConfig, JobDocument, PromptEntry, SamplerConfig, TextNode};
use crate::extends::resolve_extends;
use crate::hooks_merge::{merge_hook_config, select_mods};
use crate::record::{JobRecord, Params, PromptResult};
use crate::text_tree::{build_text_variations, Variation};
use prompty_core::{BlockPath, Error, Result};
use prompty_extensions::ExtensionTable;
use prompty_loras::{generate_job_permutations, parse_lora_combination_string, LoraConfig, LoraLibrary, LoraLibraryEntry};
use prompty_resolver::{process_text_variant, resolve_wildcards, WildcardDef, WildcardUsage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Tuning knobs that apply across a whole job document, independent of any
/// single prompt's own overrides.
pub struct ExpanderConfig<'a> {
    pub lora_root: &'a str,
    pub range_increment: f64,
    pub default_params: Map<String, Value>,
}

fn block_path_from(root_idx: usize, path: &[usize]) -> BlockPath {
    let mut bp = BlockPath::root(root_idx);
    for seg in path {
        bp = bp.child(*seg);
    }
    bp
}

fn build_lora_library(doc: &JobDocument, lora_root: &str) -> LoraLibrary {
    let mut library = LoraLibrary::new();
    for entry in &doc.loras {
        let triggers = entry
            .triggers
            .clone()
            .unwrap_or_else(|| entry.trigger.clone().into_iter().filter(|t| !t.is_empty()).collect());
        let path = if entry.name.starts_with('/') {
            entry.name.clone()
        } else {
            format!("{}/{}", lora_root.trim_end_matches('/'), entry.name)
        };
        library.insert(
            entry.alias.clone(),
            LoraLibraryEntry { path, strength: entry.strength, triggers },
        );
    }
    library
}

fn collect_ext_names(items: &[TextNode], out: &mut Vec<String>) {
    for item in items {
        if let Some(name) = &item.ext_text {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        collect_ext_names(&item.after, out);
    }
}

fn is_nested(text: &Value) -> bool {
    match text {
        Value::Array(items) => items.first().is_some_and(|first| {
            first.is_object()
                && (first.get("content").is_some() || first.get("ext_text").is_some())
        }),
        _ => false,
    }
}

fn flat_text_list(text: &Value, prompt_id: &str) -> Vec<String> {
    match text {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => tracing::warn!(prompt_id, "non-string entry in flat text list ignored"),
                }
            }
            out
        }
        Value::Null => Vec::new(),
        _ => {
            tracing::warn!(prompt_id, "unsupported 'text' shape, treated as empty");
            Vec::new()
        }
    }
}

struct ExpandedVariation {
    text: String,
    template: String,
    ext_indices: HashMap<String, usize>,
    wildcard_usage: WildcardUsage,
    is_leaf: bool,
    path: Vec<usize>,
    annotations: Map<String, Value>,
}

#[allow(clippy::too_many_arguments)]
fn expand_prompt_text(
    prompt: &PromptEntry,
    defaults: &Defaults,
    extensions: &ExtensionTable,
    wildcards: &[WildcardDef],
    text_components_extra: &HashMap<String, Vec<String>>,
    rng: &mut StdRng,
) -> Result<Vec<ExpandedVariation>> {
    let ext_text_max = prompt.ext_text_max.unwrap_or(defaults.ext_text_max);
    let wildcards_max = prompt.wildcards_max.unwrap_or(defaults.wildcards_max);

    if is_nested(&prompt.text) {
        let items: Vec<TextNode> = serde_json::from_value(prompt.text.clone())
            .map_err(|e| Error::config(format!("prompt '{}': invalid nested text tree: {e}", prompt.id)))?;

        let mut ext_names = Vec::new();
        collect_ext_names(&items, &mut ext_names);
        let mut ext_texts: HashMap<String, Vec<String>> = HashMap::new();
        for name in ext_names {
            if let Some(entry) = extensions.iter().find(|e| e.id == name) {
                if let Some(Value::Array(values)) = entry.fields.get("text") {
                    ext_texts.insert(
                        name,
                        values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
                    );
                } else if let Some(Value::String(s)) = entry.fields.get("text") {
                    ext_texts.insert(name, vec![s.clone()]);
                }
            }
        }
        for (key, extra) in text_components_extra {
            ext_texts.entry(key.clone()).or_default().extend(extra.clone());
        }

        let wildcard_lookup: HashMap<String, Vec<String>> =
            wildcards.iter().filter(|w| !w.name.is_empty()).map(|w| (w.name.clone(), w.text.clone())).collect();

        let default_leaf = prompt.checkpoint.unwrap_or(false);
        let variations = build_text_variations(
            &items,
            &ext_texts,
            ext_text_max,
            wildcards_max,
            &wildcard_lookup,
            &[],
            0,
            default_leaf,
            rng,
        );

        Ok(variations
            .into_iter()
            .map(|v: Variation| {
                let wildcard_usage = wildcard_usage_from_indices(&v.wildcard_indices, &wildcard_lookup);
                ExpandedVariation {
                    text: v.text,
                    template: v.template,
                    ext_indices: v.ext_indices,
                    wildcard_usage,
                    is_leaf: v.is_leaf,
                    path: v.path,
                    annotations: prompt.annotations.clone(),
                }
            })
            .collect())
    } else {
        let mut templates = flat_text_list(&prompt.text, &prompt.id);
        if templates.is_empty() {
            templates.push(String::new());
        }

        let mut expanded = Vec::new();
        for t in &templates {
            expanded.extend(process_text_variant(t, wildcards, wildcards_max, rng)?);
        }
        for extra in text_components_extra.values() {
            expanded.extend(extra.clone());
        }

        let resolved = resolve_wildcards(&expanded, wildcards, rng)?;
        Ok(resolved
            .into_iter()
            .map(|(text, usage)| ExpandedVariation {
                text: text.clone(),
                template: text,
                ext_indices: HashMap::new(),
                wildcard_usage: usage,
                is_leaf: true,
                path: Vec::new(),
                annotations: prompt.annotations.clone(),
            })
            .collect())
    }
}

fn wildcard_usage_from_indices(
    indices: &HashMap<String, usize>,
    lookup: &HashMap<String, Vec<String>>,
) -> WildcardUsage {
    let mut usage = WildcardUsage::new();
    for (name, idx) in indices {
        if let Some(values) = lookup.get(name) {
            if let Some(value) = values.get(*idx) {
                usage.insert(
                    name.clone(),
                    prompty_resolver::WildcardPick { value: value.clone(), index: idx + 1 },
                );
            }
        }
    }
    usage
}

struct SamplerExpansion {
    sampler: Option<String>,
    scheduler: Option<String>,
    params: Params,
    sampler_params: Map<String, Value>,
    suffix: String,
}

fn expand_sampler_list(doc: &JobDocument, cfg: &ExpanderConfig) -> Vec<SamplerExpansion> {
    let mut out = Vec::new();
    for sampler_cfg in doc.model.sampler.as_list() {
        out.extend(expand_one_sampler(&sampler_cfg, cfg));
    }
    if out.is_empty() {
        out.push(expand_one_sampler(&SamplerConfig::Empty, cfg).remove(0));
    }
    out
}

fn default_params_struct(default_params: &Map<String, Value>) -> Params {
    Params {
        width: default_params.get("width").cloned(),
        height: default_params.get("height").cloned(),
        steps: default_params.get("steps").cloned(),
        cfg: default_params.get("cfg").cloned(),
    }
}

fn expand_one_sampler(sampler_cfg: &SamplerConfig, cfg: &ExpanderConfig) -> Vec<SamplerExpansion> {
    const FIXED_KEYS: &[&str] = &["width", "height", "steps", "cfg", "scheduler", "name", "sampler"];

    match sampler_cfg {
        SamplerConfig::Empty => vec![SamplerExpansion {
            sampler: None,
            scheduler: None,
            params: default_params_struct(&cfg.default_params),
            sampler_params: Map::new(),
            suffix: String::new(),
        }],
        SamplerConfig::Name(name) => vec![SamplerExpansion {
            sampler: Some(name.clone()),
            scheduler: None,
            params: default_params_struct(&cfg.default_params),
            sampler_params: Map::new(),
            suffix: format!("_{name}_simple"),
        }],
        SamplerConfig::Structured(map) => {
            let mut combos: Vec<Map<String, Value>> = vec![Map::new()];
            for (k, v) in map {
                if let Value::Array(items) = v {
                    let mut next = Vec::with_capacity(combos.len() * items.len().max(1));
                    for combo in &combos {
                        for item in items {
                            let mut c = combo.clone();
                            c.insert(k.clone(), item.clone());
                            next.push(c);
                        }
                    }
                    combos = next;
                } else {
                    for combo in combos.iter_mut() {
                        combo.insert(k.clone(), v.clone());
                    }
                }
            }

            combos
                .into_iter()
                .map(|combo| {
                    let name = combo
                        .get("name")
                        .or_else(|| combo.get("sampler"))
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    let scheduler =
                        combo.get("scheduler").and_then(|v| v.as_str()).map(str::to_string);

                    let mut params = default_params_struct(&cfg.default_params);
                    if let Some(w) = combo.get("width") {
                        params.width = Some(w.clone());
                    }
                    if let Some(h) = combo.get("height") {
                        params.height = Some(h.clone());
                    }
                    if let Some(s) = combo.get("steps") {
                        params.steps = Some(s.clone());
                    }
                    if let Some(c) = combo.get("cfg") {
                        params.cfg = Some(c.clone());
                    }

                    let mut sampler_params = Map::new();
                    let mut extra_suffix = String::new();
                    let mut extra_keys: Vec<&String> = combo.keys().filter(|k| !FIXED_KEYS.contains(&k.as_str())).collect();
                    extra_keys.sort();
                    for key in extra_keys {
                        let value = &combo[key];
                        sampler_params.insert(key.clone(), value.clone());
                        extra_suffix.push_str(&format!("_{key}{}", compact_value(value)));
                    }

                    let suffix = format!(
                        "_{}_{}{extra_suffix}",
                        name.clone().unwrap_or_else(|| "default".to_string()),
                        scheduler.clone().unwrap_or_else(|| "simple".to_string())
                    );

                    SamplerExpansion { sampler: name, scheduler, params, sampler_params, suffix }
                })
                .collect()
        }
    }
}

fn compact_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Build the full, flat, block-tagged job record list for one job document.
pub fn expand_job(
    doc: &JobDocument,
    extensions: &ExtensionTable,
    cfg: &ExpanderConfig,
    composition_id: u64,
) -> Result<Vec<JobRecord>> {
    let mut rng = StdRng::seed_from_u64(composition_id);
    let library = build_lora_library(doc, cfg.lora_root);
    let sampler_expansions = expand_sampler_list(doc, cfg);

    // Each base record (pre-resolution-permutation) paired with the
    // resolution list it should expand into once indexing/sorting is done.
    let mut records: Vec<(JobRecord, Vec<[String; 2]>)> = Vec::new();
    let mut root_idx = 0usize;

    for prompt in &doc.prompts {
        if prompt.skip {
            continue;
        }

        let ext_text_max = prompt.ext_text_max.unwrap_or(doc.defaults.ext_text_max);
        let namespace = prompt.ext.as_deref().or(doc.defaults.ext.as_deref()).unwrap_or_default();
        let extends = resolve_extends(&prompt.extends, namespace, extensions, &prompt.wildcards, ext_text_max, &mut rng)?;

        let selected_mods = select_mods(&doc.mods, &prompt.mods);
        let hooks_config: HookConfig = merge_hook_config(&selected_mods, &doc.defaults.hooks, &prompt.hooks);

        let mut lora_combos: Vec<String> = prompt.loras.clone();
        lora_combos.extend(extends.lora_combos.clone());

        let annotations_depends_on: Vec<String> = prompt
            .annotations
            .get("_depends_on")
            .map(|v| match v {
                Value::Array(items) => items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect(),
                Value::String(s) => vec![s.clone()],
                _ => Vec::new(),
            })
            .unwrap_or_default();
        let mut depends_on = prompt.depends_on.clone();
        for d in annotations_depends_on {
            if !depends_on.contains(&d) {
                depends_on.push(d);
            }
        }

        let variations = expand_prompt_text(
            prompt,
            &doc.defaults,
            extensions,
            &extends.wildcards,
            &extends.text_components,
            &mut rng,
        )?;

        for variation in &variations {
            let block_path = block_path_from(root_idx, &variation.path);
            let parent_path = block_path.parent();

            let combo_list: Vec<Option<&str>> = if lora_combos.is_empty() {
                vec![None]
            } else {
                lora_combos.iter().map(|s| Some(s.as_str())).collect()
            };

            for combo in combo_list {
                let (loras_perms, base_suffix): (Vec<(Vec<LoraConfig>, String)>, &str) = match combo {
                    None => (vec![(Vec::new(), String::new())], "base"),
                    Some(combo_str) => {
                        let arrays = parse_lora_combination_string(combo_str, &library, cfg.range_increment);
                        let perms = generate_job_permutations(&arrays);
                        if perms.is_empty() {
                            (vec![(Vec::new(), String::new())], "base")
                        } else {
                            (perms, "")
                        }
                    }
                };

                for (loras, lora_suffix) in loras_perms {
                    let suffix_prefix = if lora_suffix.is_empty() { base_suffix.to_string() } else { lora_suffix };

                    for sampler in &sampler_expansions {
                        let filename_suffix = format!("{suffix_prefix}{}", sampler.suffix);

                        // Resolution permutation happens in a separate phase below,
                        // after `original_index` is assigned and the list is sorted —
                        // resolution duplicates must inherit their parent's index
                        // rather than being renumbered (see `expand_job`'s finalisation).
                        records.push((
                            JobRecord {
                                prompt: PromptResult {
                                    id: prompt.id.clone(),
                                    text: variation.text.clone(),
                                    template: variation.template.clone(),
                                    annotations: variation.annotations.clone(),
                                },
                                loras: loras.clone(),
                                filename_suffix,
                                sampler: sampler.sampler.clone(),
                                scheduler: sampler.scheduler.clone(),
                                params: sampler.params.clone(),
                                sampler_params: sampler.sampler_params.clone(),
                                original_index: 0,
                                block_path: block_path.clone(),
                                parent_path: parent_path.clone(),
                                depends_on: depends_on.clone(),
                                wildcard_usage: variation.wildcard_usage.clone(),
                                ext_indices: variation.ext_indices.clone(),
                                is_leaf: variation.is_leaf,
                                resolution_expressions: None,
                                hooks_config: hooks_config.clone(),
                            },
                            prompt.resolutions.clone(),
                        ));
                    }
                }
            }
        }

        root_idx += 1;
    }

    for (i, (record, _)) in records.iter_mut().enumerate() {
        record.original_index = i + 1;
    }

    records.sort_by(|(a, _), (b, _)| {
        a.lora_signature()
            .cmp(&b.lora_signature())
            .then_with(|| a.sampler.cmp(&b.sampler))
    });

    // Resolution permutation: each base record expands into one record per
    // resolution (or passes through unchanged), inheriting the parent's
    // already-assigned `original_index` rather than being renumbered.
    let mut final_records: Vec<JobRecord> = Vec::new();
    for (record, resolutions) in records {
        if resolutions.is_empty() {
            final_records.push(record);
        } else {
            for res in &resolutions {
                let mut copy = record.clone();
                copy.resolution_expressions = Some(res.clone());
                final_records.push(copy);
            }
        }
    }

    Ok(final_records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prompty_extensions::ExtensionTable;

    fn cfg() -> ExpanderConfig<'static> {
        ExpanderConfig { lora_root: "/loras", range_increment: 0.1, default_params: Map::new() }
    }

    #[test]
    fn resolution_duplicates_inherit_their_parent_original_index() {
        let yaml = r#"
prompts:
  - id: scene
    text: "a plain scene"
    resolutions:
      - ["512", "512"]
      - ["768", "768"]
      - ["1024", "1024"]
"#;
        let doc: JobDocument = serde_yaml::from_str(yaml).unwrap();
        let extensions: ExtensionTable = Vec::new();
        let records = expand_job(&doc, &extensions, &cfg(), 1).unwrap();

        assert_eq!(records.len(), 3);
        let indices: Vec<usize> = records.iter().map(|r| r.original_index).collect();
        assert_eq!(indices, vec![1, 1, 1], "resolution duplicates must share the base job's original_index");
    }

    #[test]
    fn original_index_is_dense_and_sequential_across_distinct_base_jobs() {
        let yaml = r#"
prompts:
  - id: a
    text: "first"
    resolutions:
      - ["512", "512"]
      - ["768", "768"]
  - id: b
    text: "second"
"#;
        let doc: JobDocument = serde_yaml::from_str(yaml).unwrap();
        let extensions: ExtensionTable = Vec::new();
        let records = expand_job(&doc, &extensions, &cfg(), 1).unwrap();

        assert_eq!(records.len(), 3);
        let mut indices: Vec<usize> = records.iter().map(|r| r.original_index).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices, vec![1, 2], "two base jobs -> exactly two distinct original_index values");
    }
}
