//! The 3-layer hook-config merge: selected mod bundles -> job
//! `defaults.hooks` -> per-prompt `hooks` overrides. Performed once per job
//! at config-resolution time (by the expander), not per hook invocation.

use crate::document::{HookConfig, HookEntry, ModsSelection};
use std::collections::HashMap;

/// For each hook name: prompt entries append to defaults, which append to
/// the selected mods. A `None` at a given key in the prompt layer removes
/// that stage entirely (the job-level and mod-level entries for that name
/// are dropped, not just suppressed).
pub fn merge_hook_config(
    mods: &HookConfig,
    defaults: &HookConfig,
    prompt_overrides: &HashMap<String, Option<Vec<HookEntry>>>,
) -> HookConfig {
    let mut merged: HookConfig = HashMap::new();

    let mut names: Vec<&String> = mods.keys().chain(defaults.keys()).chain(prompt_overrides.keys()).collect();
    names.sort();
    names.dedup();

    for name in names {
        if let Some(override_entry) = prompt_overrides.get(name) {
            match override_entry {
                None => continue,
                Some(prompt_entries) => {
                    let mut chain = mods.get(name).cloned().unwrap_or_default();
                    chain.extend(defaults.get(name).cloned().unwrap_or_default());
                    chain.extend(prompt_entries.clone());
                    merged.insert(name.clone(), chain);
                }
            }
        } else {
            let mut chain = mods.get(name).cloned().unwrap_or_default();
            chain.extend(defaults.get(name).cloned().unwrap_or_default());
            merged.insert(name.clone(), chain);
        }
    }

    merged
}

/// Flattens the document-level named mod registry down to one `HookConfig`
/// for a single prompt, honouring that prompt's `mods.enable`/`disable`
/// selection. With an empty `enable` list, every mod not named in `disable`
/// applies; a non-empty `enable` list is an allow-list (still subject to
/// `disable`). Bundles are applied in sorted name order for determinism.
pub fn select_mods(registry: &HashMap<String, HookConfig>, selection: &ModsSelection) -> HookConfig {
    let mut names: Vec<&String> = registry.keys().collect();
    names.sort();

    let mut combined: HookConfig = HashMap::new();
    for name in names {
        if selection.disable.iter().any(|d| d == name) {
            continue;
        }
        if !selection.enable.is_empty() && !selection.enable.iter().any(|e| e == name) {
            continue;
        }
        let Some(bundle) = registry.get(name) else { continue };
        for (hook_name, entries) in bundle {
            combined.entry(hook_name.clone()).or_default().extend(entries.clone());
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn entry(script: &str) -> HookEntry {
        HookEntry { script: script.to_string(), params: Map::new() }
    }

    #[test]
    fn prompt_appends_to_defaults_which_append_to_mods() {
        let mut mods = HashMap::new();
        mods.insert("pre".to_string(), vec![entry("mods/a.py")]);
        let mut defaults = HashMap::new();
        defaults.insert("pre".to_string(), vec![entry("defaults/b.py")]);
        let mut prompt = HashMap::new();
        prompt.insert("pre".to_string(), Some(vec![entry("prompt/c.py")]));

        let merged = merge_hook_config(&mods, &defaults, &prompt);
        let scripts: Vec<&str> = merged["pre"].iter().map(|e| e.script.as_str()).collect();
        assert_eq!(scripts, vec!["mods/a.py", "defaults/b.py", "prompt/c.py"]);
    }

    #[test]
    fn null_override_removes_the_stage() {
        let mut mods = HashMap::new();
        mods.insert("post".to_string(), vec![entry("mods/a.py")]);
        let defaults = HashMap::new();
        let mut prompt = HashMap::new();
        prompt.insert("post".to_string(), None);

        let merged = merge_hook_config(&mods, &defaults, &prompt);
        assert!(!merged.contains_key("post"));
    }

    #[test]
    fn disable_removes_a_named_mod_bundle() {
        let mut registry = HashMap::new();
        registry.insert("watermark".to_string(), {
            let mut m = HashMap::new();
            m.insert("post".to_string(), vec![entry("mods/watermark.py")]);
            m
        });
        let selection = ModsSelection { enable: vec![], disable: vec!["watermark".to_string()] };
        let combined = select_mods(&registry, &selection);
        assert!(combined.is_empty());
    }

    #[test]
    fn enable_allow_lists_a_subset() {
        let mut registry = HashMap::new();
        registry.insert("a".to_string(), {
            let mut m = HashMap::new();
            m.insert("pre".to_string(), vec![entry("mods/a.py")]);
            m
        });
        registry.insert("b".to_string(), {
            let mut m = HashMap::new();
            m.insert("pre".to_string(), vec![entry("mods/b.py")]);
            m
        });
        let selection = ModsSelection { enable: vec!["a".to_string()], disable: vec![] };
        let combined = select_mods(&registry, &selection);
        let scripts: Vec<&str> = combined["pre"].iter().map(|e| e.script.as_str()).collect();
        assert_eq!(scripts, vec!["mods/a.py"]);
    }
}
