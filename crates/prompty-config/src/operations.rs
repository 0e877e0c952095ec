//! Build-hook operation files: `jobs/<job_id>/operations/<name>.yaml`. An
//! operation is a named wildcard-value remap — `mappings[wc_name][original]
//! = replacement` — consumed by a `replace_wildcards` build hook.
//!
//! Two on-disk shapes are accepted when loading (the richer `wildcards` list
//! form, and a bare `mappings` dict), normalized to one struct in memory.
//! Saves always write the `wildcards` list form back out, sorted for
//! determinism.

use prompty_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub type Mappings = HashMap<String, HashMap<String, String>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Operation {
    pub name: String,
    pub mappings: Mappings,
}

#[derive(Deserialize)]
struct ReplaceEntry {
    text: String,
    with: String,
}

#[derive(Deserialize)]
struct WildcardEntry {
    name: String,
    #[serde(default)]
    replace: Vec<ReplaceEntry>,
}

#[derive(Deserialize)]
struct OnDisk {
    #[serde(default)]
    wildcards: Vec<WildcardEntry>,
    #[serde(default)]
    mappings: Option<Mappings>,
}

#[derive(Serialize)]
struct ReplaceEntryOut {
    text: String,
    with: String,
}

#[derive(Serialize)]
struct WildcardEntryOut {
    name: String,
    replace: Vec<ReplaceEntryOut>,
}

#[derive(Serialize)]
struct OnDiskOut {
    wildcards: Vec<WildcardEntryOut>,
}

fn operations_dir(job_dir: &Path) -> PathBuf {
    job_dir.join("operations")
}

fn operation_path(job_dir: &Path, name: &str) -> PathBuf {
    operations_dir(job_dir).join(format!("{name}.yaml"))
}

/// Sorted operation names under `jobs/<job_id>/operations/`. A missing
/// directory yields an empty list rather than an error.
pub fn list_operations(job_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(operations_dir(job_dir)) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                return None;
            }
            path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
        })
        .collect();
    names.sort();
    names
}

/// Load one operation, normalizing either on-disk shape (`wildcards` list
/// form preferred, falling back to a bare `mappings` dict) to `Operation`.
pub fn load_operation(job_dir: &Path, name: &str) -> Result<Operation> {
    let path = operation_path(job_dir, name);
    let raw = std::fs::read_to_string(&path)
        .map_err(|_| Error::config(format!("operation '{name}' not found")))?;
    let on_disk: OnDisk = serde_yaml::from_str(&raw)?;

    let mappings = if !on_disk.wildcards.is_empty() {
        on_disk
            .wildcards
            .into_iter()
            .map(|w| {
                let replacements = w.replace.into_iter().map(|r| (r.text, r.with)).collect();
                (w.name, replacements)
            })
            .collect()
    } else {
        on_disk.mappings.unwrap_or_default()
    };

    Ok(Operation { name: name.to_string(), mappings })
}

/// Write `mappings` back to `jobs/<job_id>/operations/<name>.yaml` in the
/// `wildcards` list shape, sorted by wildcard name then by original value
/// so repeated saves of equivalent data produce byte-identical files.
pub fn save_operation(job_dir: &Path, name: &str, mappings: Mappings) -> Result<()> {
    let dir = operations_dir(job_dir);
    std::fs::create_dir_all(&dir)?;

    let mut wc_names: Vec<&String> = mappings.keys().collect();
    wc_names.sort();

    let wildcards = wc_names
        .into_iter()
        .map(|wc_name| {
            let mut replacements: Vec<(&String, &String)> = mappings[wc_name].iter().collect();
            replacements.sort_by_key(|(text, _)| (*text).clone());
            WildcardEntryOut {
                name: wc_name.clone(),
                replace: replacements
                    .into_iter()
                    .map(|(text, with)| ReplaceEntryOut { text: text.clone(), with: with.clone() })
                    .collect(),
            }
        })
        .collect();

    let yaml = serde_yaml::to_string(&OnDiskOut { wildcards })?;
    std::fs::write(operation_path(job_dir, name), yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_operations_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_operations(dir.path()).is_empty());
    }

    #[test]
    fn loads_wildcards_list_shape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("operations")).unwrap();
        std::fs::write(
            dir.path().join("operations/swap.yaml"),
            "wildcards:\n  - name: color\n    replace:\n      - text: red\n        with: blue\n",
        )
        .unwrap();

        let op = load_operation(dir.path(), "swap").unwrap();
        assert_eq!(op.mappings["color"]["red"], "blue");
    }

    #[test]
    fn loads_bare_mappings_shape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("operations")).unwrap();
        std::fs::write(
            dir.path().join("operations/swap.yaml"),
            "mappings:\n  color:\n    red: blue\n",
        )
        .unwrap();

        let op = load_operation(dir.path(), "swap").unwrap();
        assert_eq!(op.mappings["color"]["red"], "blue");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut mappings: Mappings = HashMap::new();
        mappings.insert("color".to_string(), {
            let mut m = HashMap::new();
            m.insert("red".to_string(), "blue".to_string());
            m
        });

        save_operation(dir.path(), "swap", mappings.clone()).unwrap();
        assert_eq!(list_operations(dir.path()), vec!["swap".to_string()]);

        let loaded = load_operation(dir.path(), "swap").unwrap();
        assert_eq!(loaded.mappings, mappings);
    }
}
