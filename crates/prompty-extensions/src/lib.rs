//! Extension and addon management.
//!
//! Extensions are reusable YAML fragments (shared wildcards, text snippets,
//! LoRA configurations) referenced by id from job prompts. Addons are
//! job-local YAML files that merge, update, or replace a global extension
//! before the job is expanded.

use prompty_core::{Error, Result};
use prompty_resolver::WildcardDef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// A single extension entry loaded from the `ext:` section of the global
/// config or appended by an addon. `fields` holds the free-form `text`,
/// `textN`, and any custom keys; `wildcards` and `loras` are structured and
/// handled by their own resolvers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Extension {
    pub id: String,
    /// The `ext` namespace this entry was loaded under (e.g. `"defaults"`,
    /// `"fashion"`). Empty when loaded without namespace scoping (job-local
    /// addons that don't declare one). Two extensions may share an `id` as
    /// long as they live in different namespaces.
    #[serde(default, rename = "_ext")]
    pub namespace: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub wildcards: Vec<WildcardDef>,
}

pub type ExtensionTable = Vec<Extension>;

/// An addon YAML document: same shape as an extension plus the directives
/// that control how it's applied.
#[derive(Clone, Debug, Deserialize)]
pub struct Addon {
    pub id: String,
    #[serde(default = "default_mode")]
    pub mode: AddonMode,
    #[serde(default)]
    pub replace: Map<String, Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub wildcards: Vec<WildcardDef>,
}

fn default_mode() -> AddonMode {
    AddonMode::Merge
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddonMode {
    Merge,
    Update,
    Replace,
}

const EXCLUDED_ADDON_FILES: &[&str] = &["jobs.yaml", "hooks.yaml", "build_stages.yaml", "operations.yaml"];

/// True if `key` is `text` or `text<digits>` — the dynamic keys that
/// participate in the job expander's text-permutation machinery.
pub fn is_dynamic_text_key(key: &str) -> bool {
    if key == "text" {
        return true;
    }
    match key.strip_prefix("text") {
        Some(rest) if !rest.is_empty() => rest.bytes().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

/// Merge `source` into `target` in place, deduplicating list values and
/// merging same-named wildcard definitions. Returns a human-readable change
/// log; merge activity is surfaced as structured `tracing` events rather
/// than a silent mutation.
pub fn merge_extension_data(target: &mut Extension, source: &Addon) -> Vec<String> {
    let mut changes = Vec::new();

    for (key, value) in &source.fields {
        match target.fields.get_mut(key) {
            None => {
                let count = value.as_array().map(|a| a.len()).unwrap_or(1);
                target.fields.insert(key.clone(), value.clone());
                changes.push(format!(
                    "added new key 'ext.{}.{key}' with {count} items",
                    source.id
                ));
            }
            Some(existing) => {
                let mut t_vals = as_list(existing);
                let s_vals = as_list(value);
                let mut added = Vec::new();
                for item in s_vals {
                    if !t_vals.contains(&item) {
                        t_vals.push(item.clone());
                        added.push(item);
                    }
                }
                *existing = Value::Array(t_vals);
                if !added.is_empty() {
                    changes.push(format!("added to 'ext.{}.{key}': {added:?}", source.id));
                }
            }
        }
    }

    if !source.wildcards.is_empty() {
        if target.wildcards.is_empty() {
            target.wildcards = source.wildcards.clone();
            changes.push(format!(
                "added new key 'ext.{}.wildcards' with {} definitions",
                source.id,
                source.wildcards.len()
            ));
        } else {
            for src_wc in &source.wildcards {
                if let Some(target_wc) = target.wildcards.iter_mut().find(|w| w.name == src_wc.name) {
                    let mut added = Vec::new();
                    for item in &src_wc.text {
                        if !target_wc.text.contains(item) {
                            target_wc.text.push(item.clone());
                            added.push(item.clone());
                        }
                    }
                    if !added.is_empty() {
                        changes.push(format!(
                            "added to 'ext.{}.wildcards.{}': {added:?}",
                            source.id, src_wc.name
                        ));
                    }
                } else {
                    target.wildcards.push(src_wc.clone());
                    changes.push(format!(
                        "added new wildcard definition 'ext.{}.wildcards.{}'",
                        source.id, src_wc.name
                    ));
                }
            }
        }
    }

    changes
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Replace whole-word occurrences of each `old -> new` pair across every
/// string value reachable in `fields` and `wildcards` (recursing through
/// arrays), in place.
pub fn apply_replace_filtering(
    fields: &mut Map<String, Value>,
    wildcards: &mut [WildcardDef],
    replace: &Map<String, Value>,
) {
    if replace.is_empty() {
        return;
    }
    let pairs: Vec<(String, String)> = replace
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    for value in fields.values_mut() {
        replace_in_value(value, &pairs);
    }
    for wc in wildcards.iter_mut() {
        for text in wc.text.iter_mut() {
            for (old, new) in &pairs {
                *text = text.replace(old.as_str(), new);
            }
        }
    }
}

fn replace_in_value(value: &mut Value, pairs: &[(String, String)]) {
    match value {
        Value::String(s) => {
            for (old, new) in pairs {
                *s = s.replace(old.as_str(), new);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                replace_in_value(item, pairs);
            }
        }
        _ => {}
    }
}

/// Scan `job_dir` for addon YAML files (any `*.yaml` except the reserved
/// pipeline config names) and apply them, in filename order, to `table`.
pub fn process_addons(job_dir: &Path, table: &mut ExtensionTable) -> Result<()> {
    let mut addon_paths: Vec<_> = std::fs::read_dir(job_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("yaml")
                && !p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| EXCLUDED_ADDON_FILES.contains(&n))
                    .unwrap_or(true)
        })
        .collect();
    addon_paths.sort();

    for path in addon_paths {
        let raw = std::fs::read_to_string(&path)?;
        let mut addon: Addon = serde_yaml::from_str(&raw)?;
        if addon.id.is_empty() {
            return Err(Error::extension(format!(
                "addon '{}' is missing an 'id' field",
                path.display()
            )));
        }

        if !addon.replace.is_empty() {
            apply_replace_filtering(&mut addon.fields, &mut addon.wildcards, &addon.replace);
        }

        let existing = table.iter_mut().find(|e| e.id == addon.id);

        match (addon.mode, existing) {
            (AddonMode::Replace, Some(slot)) => {
                *slot = Extension { id: addon.id.clone(), namespace: String::new(), fields: addon.fields.clone(), wildcards: addon.wildcards.clone() };
            }
            (AddonMode::Replace, None) => {
                table.push(Extension { id: addon.id.clone(), namespace: String::new(), fields: addon.fields.clone(), wildcards: addon.wildcards.clone() });
            }
            (AddonMode::Update, Some(slot)) => {
                for (k, v) in &addon.fields {
                    slot.fields.insert(k.clone(), v.clone());
                }
                if !addon.wildcards.is_empty() {
                    slot.wildcards = addon.wildcards.clone();
                }
            }
            (AddonMode::Update, None) => {
                table.push(Extension { id: addon.id.clone(), namespace: String::new(), fields: addon.fields.clone(), wildcards: addon.wildcards.clone() });
            }
            (AddonMode::Merge, Some(slot)) => {
                if !addon.replace.is_empty() {
                    apply_replace_filtering(&mut slot.fields, &mut slot.wildcards, &addon.replace);
                }
                let changes = merge_extension_data(slot, &addon);
                for change in changes {
                    tracing::debug!(addon = %path.display(), "{change}");
                }
            }
            (AddonMode::Merge, None) => {
                table.push(Extension { id: addon.id.clone(), namespace: String::new(), fields: addon.fields.clone(), wildcards: addon.wildcards.clone() });
            }
        }
    }

    Ok(())
}

/// Find the extension entry matching `ext_id`, preferring one whose
/// `namespace` matches `namespace`, falling back to the first entry with a
/// matching `id` in any namespace. Lets two extensions share an `id` across
/// different namespaces without colliding.
pub fn find_extension<'a>(ext_id: &str, namespace: &str, table: &'a ExtensionTable) -> Option<&'a Extension> {
    table
        .iter()
        .find(|e| e.id == ext_id && e.namespace == namespace)
        .or_else(|| table.iter().find(|e| e.id == ext_id))
}

/// Resolve an extension path string (`id`, `id.key`, `id.one`, `id.key.one`)
/// against the extension table into a list of text values. `namespace` is
/// the prompt's effective `ext` namespace — used to disambiguate entries
/// that share an `id` across namespaces.
pub fn resolve_extension(
    path_str: &str,
    namespace: &str,
    table: &ExtensionTable,
    rng: &mut rand::rngs::StdRng,
) -> Result<Vec<String>> {
    use rand::seq::SliceRandom;

    let mut parts: Vec<&str> = path_str.split('.').collect();
    let is_random = parts.last() == Some(&"one");
    if is_random {
        parts.pop();
    }

    let (ext_id, ext_key) = match parts.as_slice() {
        [id] => (*id, None),
        [id, key] => (*id, Some(*key)),
        _ => {
            return Err(Error::extension(format!(
                "invalid extension path format: '{path_str}'"
            )))
        }
    };

    if matches!(ext_key, Some("wildcards") | Some("loras")) {
        return Err(Error::extension(format!(
            "extension path '{path_str}' targets structured data and cannot be resolved as text"
        )));
    }

    let entry = find_extension(ext_id, namespace, table)
        .ok_or_else(|| Error::extension(format!("extension id '{ext_id}' not found")))?;

    let mut resolved = Vec::new();
    if let Some(key) = ext_key {
        match entry.fields.get(key) {
            Some(Value::Array(items)) => {
                resolved.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)))
            }
            Some(Value::String(s)) => resolved.push(s.clone()),
            _ => {}
        }
        if resolved.is_empty() {
            return Err(Error::extension(format!(
                "extension '{path_str}' resolved to an empty or non-string list for key '{key}'"
            )));
        }
    } else {
        for (key, value) in &entry.fields {
            if !is_dynamic_text_key(key) {
                continue;
            }
            match value {
                Value::Array(items) => {
                    resolved.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)))
                }
                Value::String(s) => resolved.push(s.clone()),
                _ => {}
            }
        }
        if resolved.is_empty() {
            return Err(Error::extension(format!(
                "extension '{path_str}' found but has no text data in any text key"
            )));
        }
    }

    if is_random {
        let pick = resolved.choose(rng).cloned().unwrap();
        Ok(vec![pick])
    } else {
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use serde_json::json;

    fn ext(id: &str, text: Vec<&str>) -> Extension {
        let mut fields = Map::new();
        fields.insert("text".into(), json!(text));
        Extension { id: id.into(), namespace: String::new(), fields, wildcards: vec![] }
    }

    fn ext_ns(id: &str, namespace: &str, text: Vec<&str>) -> Extension {
        let mut fields = Map::new();
        fields.insert("text".into(), json!(text));
        Extension { id: id.into(), namespace: namespace.into(), fields, wildcards: vec![] }
    }

    #[test]
    fn dynamic_text_key_matches_text_and_textn() {
        assert!(is_dynamic_text_key("text"));
        assert!(is_dynamic_text_key("text2"));
        assert!(is_dynamic_text_key("text99"));
        assert!(!is_dynamic_text_key("pose"));
        assert!(!is_dynamic_text_key("loras"));
    }

    #[test]
    fn merge_deduplicates_text_lists() {
        let mut target = ext("pose", vec!["standing"]);
        let mut fields = Map::new();
        fields.insert("text".into(), json!(["sitting", "standing"]));
        let addon = Addon { id: "pose".into(), mode: AddonMode::Merge, replace: Map::new(), fields, wildcards: vec![] };
        let changes = merge_extension_data(&mut target, &addon);
        assert!(!changes.is_empty());
        assert_eq!(
            target.fields["text"],
            json!(["standing", "sitting"])
        );
    }

    #[test]
    fn resolve_all_text_keys() {
        let table = vec![ext("sexy-pose", vec!["a", "b"])];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let out = resolve_extension("sexy-pose", "", &table, &mut rng).unwrap();
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn resolve_one_picks_single_item() {
        let table = vec![ext("sexy-pose", vec!["a", "b"])];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let out = resolve_extension("sexy-pose.one", "", &table, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn resolve_wildcards_key_is_an_error() {
        let table = vec![ext("sexy-pose", vec!["a"])];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let err = resolve_extension("sexy-pose.wildcards", "", &table, &mut rng).unwrap_err();
        assert!(matches!(err, Error::Extension(_)));
    }

    #[test]
    fn missing_extension_is_an_error() {
        let table: ExtensionTable = vec![];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        assert!(resolve_extension("ghost", "", &table, &mut rng).is_err());
    }

    #[test]
    fn same_id_prefers_matching_namespace_then_falls_back_to_any() {
        let table = vec![
            ext_ns("pose", "defaults", vec!["standing"]),
            ext_ns("pose", "fashion", vec!["runway"]),
        ];
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);

        let fashion = resolve_extension("pose", "fashion", &table, &mut rng).unwrap();
        assert_eq!(fashion, vec!["runway".to_string()]);

        let defaults = resolve_extension("pose", "defaults", &table, &mut rng).unwrap();
        assert_eq!(defaults, vec!["standing".to_string()]);

        // No namespace match -> falls back to the first entry with that id.
        let unscoped = resolve_extension("pose", "other", &table, &mut rng).unwrap();
        assert_eq!(unscoped, vec!["standing".to_string()]);
    }
}
