//! Job-document export: serialize a `jobs.yaml` payload back to disk with a
//! stable, human-friendly key order and literal block style for any
//! multi-line string, and keep a timestamped backup of what was there
//! before.

use prompty_core::Result;
use serde_yaml::Value as YamlValue;
use std::path::Path;

const PREFERRED_ORDER: &[&str] = &["defaults", "model", "loras", "prompts"];

/// Re-order a job document's top-level mapping keys so the commonly-edited
/// sections come first, in a fixed order, with everything else following in
/// its original order. Keys beginning with `_`, plus `job_id`/`valid`, are
/// dropped — those are response-only metadata, not part of the saved file.
pub fn order_job_keys(mut doc: YamlValue) -> YamlValue {
    let YamlValue::Mapping(map) = &mut doc else {
        return doc;
    };

    let mut ordered = serde_yaml::Mapping::new();
    for key in PREFERRED_ORDER {
        let yaml_key = YamlValue::String(key.to_string());
        if let Some(v) = map.remove(&yaml_key) {
            ordered.insert(yaml_key, v);
        }
    }
    for (k, v) in map.iter() {
        if let YamlValue::String(s) = k {
            if s.starts_with('_') || s == "job_id" || s == "valid" {
                continue;
            }
        }
        ordered.insert(k.clone(), v.clone());
    }

    YamlValue::Mapping(ordered)
}

/// Serialize an ordered job document to YAML text. `serde_yaml` already
/// emits multi-line strings in literal block (`|`) style, matching the
/// original exporter's custom dumper.
pub fn job_to_yaml(doc: &YamlValue) -> Result<String> {
    let ordered = order_job_keys(doc.clone());
    Ok(serde_yaml::to_string(&ordered)?)
}

/// Write `yaml` to `jobs/<job_id>/jobs.yaml`, first copying any existing
/// file aside to `jobs.yaml.bak-<unix_ts>` so a bad export never destroys
/// the previous version outright.
pub fn export_job(job_dir: &Path, yaml: &str, now_unix: i64) -> Result<()> {
    std::fs::create_dir_all(job_dir)?;
    let target = job_dir.join("jobs.yaml");
    if target.exists() {
        let backup = job_dir.join(format!("jobs.yaml.bak-{now_unix}"));
        std::fs::copy(&target, backup)?;
    }
    std::fs::write(target, yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_preferred_keys_first_and_drops_metadata() {
        let doc: YamlValue = serde_yaml::from_str(
            "job_id: abc\nvalid: true\nprompts:\n  - id: p1\nmodel:\n  name: x\nextra: 1\n",
        )
        .unwrap();
        let yaml = job_to_yaml(&doc).unwrap();
        let model_pos = yaml.find("model:").unwrap();
        let prompts_pos = yaml.find("prompts:").unwrap();
        let extra_pos = yaml.find("extra:").unwrap();
        assert!(model_pos < prompts_pos);
        assert!(prompts_pos < extra_pos);
        assert!(!yaml.contains("job_id"));
        assert!(!yaml.contains("valid"));
    }

    #[test]
    fn export_backs_up_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jobs.yaml"), "prompts: []\n").unwrap();
        export_job(dir.path(), "prompts:\n  - id: p1\n", 1_700_000_000).unwrap();

        assert!(dir.path().join("jobs.yaml.bak-1700000000").exists());
        let new_contents = std::fs::read_to_string(dir.path().join("jobs.yaml")).unwrap();
        assert!(new_contents.contains("p1"));
    }
}
