//! Job/extension directory layout: `<workspace_root>/jobs/<job_id>/jobs.yaml`
//! and `<workspace_root>/ext/**/*.yaml`.

use prompty_core::{Error, Result};
use prompty_extensions::{process_addons, ExtensionTable};
use prompty_jobs::{load_job_document, JobDocument};
use std::path::{Path, PathBuf};

pub fn jobs_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("jobs")
}

pub fn job_dir(workspace_root: &Path, job_id: &str) -> PathBuf {
    jobs_dir(workspace_root).join(job_id)
}

pub fn ext_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("ext")
}

pub fn artifacts_dir(workspace_root: &Path, job_id: &str) -> PathBuf {
    job_dir(workspace_root, job_id).join("_artifacts")
}

/// One line in the `GET /jobs` listing — either a valid summary or a reason
/// the job couldn't be parsed.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum JobSummary {
    Valid {
        valid: bool,
        prompts: Vec<String>,
        loras: Vec<String>,
        defaults: serde_json::Value,
    },
    Invalid {
        valid: bool,
        error: String,
    },
}

fn summarize(job_dir: &Path) -> JobSummary {
    let jobs_yaml = job_dir.join("jobs.yaml");
    if !jobs_yaml.exists() {
        return JobSummary::Invalid { valid: false, error: "jobs.yaml not found".to_string() };
    }
    let raw = match std::fs::read_to_string(&jobs_yaml) {
        Ok(raw) => raw,
        Err(e) => return JobSummary::Invalid { valid: false, error: e.to_string() },
    };
    let doc: JobDocument = match serde_yaml::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => return JobSummary::Invalid { valid: false, error: e.to_string() },
    };
    JobSummary::Valid {
        valid: true,
        prompts: doc.prompts.iter().map(|p| p.id.clone()).collect(),
        loras: doc.loras.iter().map(|l| l.alias.clone()).collect(),
        defaults: serde_json::to_value(&doc.defaults).unwrap_or(serde_json::Value::Null),
    }
}

/// Scan `<workspace_root>/jobs/*` for job directories, in sorted name order.
/// An empty or missing jobs directory yields an empty map, not an error —
/// a workspace with no jobs defined yet is a normal state.
pub fn list_jobs(workspace_root: &Path) -> Vec<(String, JobSummary)> {
    let dir = jobs_dir(workspace_root);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    names.into_iter().map(|name| {
        let summary = summarize(&dir.join(&name));
        (name, summary)
    }).collect()
}

/// Load one job's raw YAML text and parsed document. Use
/// [`load_extension_table`] separately to build the extension table this
/// job resolves `extends`/`ext_text` against.
pub fn load_job(workspace_root: &Path, job_id: &str) -> Result<(JobDocument, String)> {
    let dir = job_dir(workspace_root, job_id);
    let jobs_yaml = dir.join("jobs.yaml");
    if !jobs_yaml.exists() {
        return Err(Error::config(format!("job '{job_id}' not found")));
    }
    let raw = std::fs::read_to_string(&jobs_yaml)?;
    let doc = load_job_document(&jobs_yaml)?;
    Ok((doc, raw))
}

/// Build the extension table a job resolves `extends`/`ext_text` against.
/// Per phase 0 of expansion, the table starts empty and is populated
/// entirely from the job directory's own addon files (any `*.yaml` other
/// than `jobs.yaml`/`hooks.yaml`/`build_stages.yaml`/`operations.yaml`,
/// applied in filename order) — there is no separate global extension
/// store consulted automatically. The top-level `ext/` tree (see
/// [`ext_dir`]) is a browsable library an author copies from into a job
/// directory; it is not itself merged in.
pub fn load_extension_table(workspace_root: &Path, job_id: &str) -> Result<ExtensionTable> {
    let mut table: ExtensionTable = Vec::new();
    let dir = job_dir(workspace_root, job_id);
    if dir.exists() {
        process_addons(&dir, &mut table)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_jobs_on_missing_directory_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_jobs(dir.path()).is_empty());
    }

    #[test]
    fn list_jobs_reports_invalid_entry_without_failing_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("jobs/broken")).unwrap();
        std::fs::write(dir.path().join("jobs/broken/jobs.yaml"), "not: [valid yaml").unwrap();
        std::fs::create_dir_all(dir.path().join("jobs/ok")).unwrap();
        std::fs::write(
            dir.path().join("jobs/ok/jobs.yaml"),
            "prompts:\n  - id: p1\n    text: hi\n",
        )
        .unwrap();

        let jobs = list_jobs(dir.path());
        assert_eq!(jobs.len(), 2);
        let (_, broken) = jobs.iter().find(|(id, _)| id == "broken").unwrap();
        assert!(matches!(broken, JobSummary::Invalid { valid: false, .. }));
        let (_, ok) = jobs.iter().find(|(id, _)| id == "ok").unwrap();
        assert!(matches!(ok, JobSummary::Valid { valid: true, .. }));
    }
}
