//! Artifact data model — the unit a `generate`/`post` hook produces, and the
//! store that flushes a completed block's artifacts to disk.

use prompty_core::{BlockPath, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Text,
    Data,
    Image,
    Video,
    File,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub mod_id: String,
    #[serde(default)]
    pub composition_idx: usize,
    #[serde(default)]
    pub block_path: Option<BlockPath>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing, skip_deserializing)]
    pub content_bytes: Option<Vec<u8>>,
    #[serde(default)]
    pub disk_path: Option<String>,
    #[serde(default)]
    pub disk_line: Option<usize>,
}

impl Artifact {
    pub fn from_value(value: &Value, block_path: &BlockPath, composition_idx: usize) -> Option<Artifact> {
        let obj = value.as_object()?;
        let name = obj.get("name")?.as_str()?.to_string();
        let mod_id = obj.get("mod_id").and_then(Value::as_str).unwrap_or("default").to_string();
        let kind = match obj.get("type").and_then(Value::as_str).unwrap_or("text") {
            "data" => ArtifactKind::Data,
            "image" => ArtifactKind::Image,
            "video" => ArtifactKind::Video,
            "file" => ArtifactKind::File,
            _ => ArtifactKind::Text,
        };
        let content_bytes = obj
            .get("content_bytes")
            .and_then(Value::as_str)
            .and_then(|s| base64_decode(s));

        Some(Artifact {
            name,
            kind,
            mod_id,
            composition_idx: obj.get("composition_idx").and_then(Value::as_u64).map(|n| n as usize).unwrap_or(composition_idx),
            block_path: Some(
                obj.get("block_path")
                    .and_then(Value::as_str)
                    .map(BlockPath::new)
                    .unwrap_or_else(|| block_path.clone()),
            ),
            preview: obj.get("preview").and_then(Value::as_str).map(str::to_string),
            content: obj.get("content").and_then(Value::as_str).map(str::to_string),
            content_bytes,
            disk_path: None,
            disk_line: None,
        })
    }
}

/// Artifacts embed binary payloads as base64 text in their JSON form (the
/// wire/hook-context representation never carries raw bytes).
fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use std::collections::HashMap as Map;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let lut: Map<u8, u8> = ALPHABET.iter().enumerate().map(|(i, &c)| (c, i as u8)).collect();
    let clean: Vec<u8> = s.bytes().filter(|b| *b != b'=' && !b.is_ascii_whitespace()).collect();
    let mut out = Vec::with_capacity(clean.len() * 3 / 4);
    for chunk in clean.chunks(4) {
        let vals: Vec<u8> = chunk.iter().filter_map(|b| lut.get(b).copied()).collect();
        if vals.is_empty() {
            continue;
        }
        let n = vals.len();
        let mut buf = 0u32;
        for v in &vals {
            buf = (buf << 6) | *v as u32;
        }
        buf <<= 6 * (4 - n);
        let bytes = buf.to_be_bytes();
        out.extend_from_slice(&bytes[..n.saturating_sub(1).max(1)]);
    }
    Some(out)
}

/// Flushes one block's accumulated artifacts to disk: binary artifacts as
/// individual files, text artifacts consolidated per-mod into NDJSON
/// (one file per `(mod_id, block_path)`, rewritten in full on each flush —
/// a block flushes exactly once, at completion, so this is never a partial
/// overwrite).
pub struct ArtifactStore {
    output_path: PathBuf,
}

#[derive(Clone, Debug, Default)]
pub struct FlushSummary {
    /// `mod_id -> artifact count` written for this block.
    pub counts: HashMap<String, usize>,
    pub total: usize,
}

impl ArtifactStore {
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    pub fn flush_block(&self, block_path: &BlockPath, artifacts: &mut [Artifact]) -> Result<FlushSummary> {
        std::fs::create_dir_all(&self.output_path)?;

        let mut by_mod: HashMap<String, Vec<&mut Artifact>> = HashMap::new();
        for artifact in artifacts.iter_mut() {
            by_mod.entry(artifact.mod_id.clone()).or_default().push(artifact);
        }

        let mut summary = FlushSummary::default();

        for (mod_id, mod_artifacts) in by_mod {
            let mod_dir = self.output_path.join(&mod_id);
            let mut text_lines: Vec<(usize, String)> = Vec::new();

            for artifact in mod_artifacts {
                if let Some(bytes) = artifact.content_bytes.take() {
                    let block_dir = mod_dir.join(block_path.as_str());
                    std::fs::create_dir_all(&block_dir)?;
                    let disk_path = block_dir.join(&artifact.name);
                    std::fs::write(&disk_path, &bytes)?;
                    artifact.disk_path = Some(format!("{mod_id}/{}/{}", block_path.as_str(), artifact.name));
                } else {
                    let content = artifact.content.clone().or_else(|| artifact.preview.clone()).unwrap_or_default();
                    let line = serde_json::json!({
                        "composition_idx": artifact.composition_idx,
                        "name": artifact.name,
                        "content": content,
                    });
                    text_lines.push((text_lines.len(), serde_json::to_string(&line)?));
                    let idx = text_lines.len() - 1;
                    artifact.disk_line = Some(idx);
                }
            }

            if !text_lines.is_empty() {
                std::fs::create_dir_all(&mod_dir)?;
                let jsonl_path = mod_dir.join(format!("{}.jsonl", block_path.as_str()));
                let relative_disk_path = format!("{mod_id}/{}.jsonl", block_path.as_str());
                let mut body = String::new();
                for (_, line) in &text_lines {
                    body.push_str(line);
                    body.push('\n');
                }
                std::fs::write(&jsonl_path, body)?;
                for (idx, _) in &text_lines {
                    if let Some(artifact) = artifacts.iter_mut().find(|a| a.mod_id == mod_id && a.disk_line == Some(*idx)) {
                        artifact.disk_path = Some(relative_disk_path.clone());
                    }
                }
                summary.counts.insert(mod_id.clone(), text_lines.len());
                summary.total += text_lines.len();
            } else {
                summary.total += artifacts.iter().filter(|a| a.mod_id == mod_id).count();
            }
        }

        Ok(summary)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}
