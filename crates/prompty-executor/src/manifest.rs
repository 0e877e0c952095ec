//! The live `manifest.json` — rewritten in full after every block flush.
//! Non-atomic overwrite; readers are expected to retry on a partial parse.

use crate::artifact::Artifact;
use prompty_core::{BlockPath, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone, Debug, Serialize)]
pub struct ManifestRun {
    pub timestamp: i64,
    pub blocks_complete: usize,
    pub blocks_total: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ManifestBlockEntry {
    pub artifacts: Vec<Artifact>,
    pub count: usize,
    pub depends_on: Vec<String>,
    pub composition_total: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct Manifest {
    pub version: u32,
    pub format: &'static str,
    pub run: ManifestRun,
    pub blocks: HashMap<String, ManifestBlockEntry>,
}

impl Manifest {
    pub fn new(timestamp: i64, blocks_complete: usize, blocks_total: usize) -> Self {
        Self {
            version: 3,
            format: "jsonl",
            run: ManifestRun { timestamp, blocks_complete, blocks_total },
            blocks: HashMap::new(),
        }
    }

    /// Only blocks that have produced at least one artifact appear here —
    /// a block with zero artifacts still exists in the executor's block
    /// table and counts toward `blocks_complete`, but is omitted from
    /// `blocks`.
    pub fn set_block(&mut self, path: &BlockPath, artifacts: Vec<Artifact>, depends_on: Vec<String>, composition_total: usize) {
        if artifacts.is_empty() {
            self.blocks.remove(path.as_str());
            return;
        }
        self.blocks.insert(
            path.as_str().to_string(),
            ManifestBlockEntry { count: artifacts.len(), artifacts, depends_on, composition_total },
        );
    }

    pub fn write(&self, output_path: &Path) -> Result<()> {
        std::fs::create_dir_all(output_path)?;
        let path = output_path.join("manifest.json");
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// Touches `<output_path>/.lock` with a timestamp; advisory only — used by
/// the event stream to guard against a user accidentally starting two runs
/// of the same job.
pub fn touch_lock(output_path: &Path, timestamp: i64) -> Result<()> {
    std::fs::create_dir_all(output_path)?;
    std::fs::write(output_path.join(".lock"), timestamp.to_string())?;
    Ok(())
}

pub fn remove_lock(output_path: &Path) {
    let _ = std::fs::remove_file(output_path.join(".lock"));
}
