//! Job-document validation for the external `/validate` interface: checks
//! structural requirements that block a run (errors) separately from
//! soft cross-reference warnings that don't (wildcard/ext_text/lora
//! references that may resolve through an extension the validator doesn't
//! load). Validity depends only on `errors`, never on `warnings`.

use prompty_jobs::JobDocument;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

fn wildcard_ref_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__([a-zA-Z0-9_-]+)__").unwrap())
}

fn collect_wildcard_refs(text: &Value, out: &mut Vec<String>) {
    match text {
        Value::String(s) => {
            for cap in wildcard_ref_pattern().captures_iter(s) {
                out.push(cap[1].to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    for cap in wildcard_ref_pattern().captures_iter(s) {
                        out.push(cap[1].to_string());
                    }
                } else if item.is_object() {
                    collect_tree_refs(item, out, &mut Vec::new());
                }
            }
        }
        _ => {}
    }
}

fn collect_tree_refs(node: &Value, wc_out: &mut Vec<String>, ext_out: &mut Vec<(String, usize)>) {
    if let Some(content) = node.get("content").and_then(|v| v.as_str()) {
        for cap in wildcard_ref_pattern().captures_iter(content) {
            wc_out.push(cap[1].to_string());
        }
    }
    if let Some(ext_text) = node.get("ext_text").and_then(|v| v.as_str()) {
        ext_out.push((ext_text.to_string(), 0));
    }
    if let Some(after) = node.get("after").and_then(|v| v.as_array()) {
        for child in after {
            collect_tree_refs(child, wc_out, ext_out);
        }
    }
}

fn collect_ext_text_refs(text: &Value, out: &mut Vec<String>) {
    if let Value::Array(items) = text {
        for item in items {
            if item.is_object() {
                let mut wc = Vec::new();
                let mut ext = Vec::new();
                collect_tree_refs(item, &mut wc, &mut ext);
                out.extend(ext.into_iter().map(|(name, _)| name));
            }
        }
    }
}

/// Validate a parsed job document against `ext_dir` (used only to check
/// that referenced `ext_text` files actually exist on disk).
pub fn validate_job(doc: &JobDocument, ext_dir: &Path) -> ValidationReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    if doc.prompts.is_empty() {
        warnings.push("job has no prompts".to_string());
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    let loras: HashSet<&str> = doc.loras.iter().map(|l| l.alias.as_str()).collect();

    for prompt in &doc.prompts {
        if prompt.id.is_empty() {
            errors.push("prompt missing 'id'".to_string());
            continue;
        }
        if !seen_ids.insert(prompt.id.clone()) {
            errors.push(format!("duplicate prompt id '{}'", prompt.id));
        }
        if matches!(&prompt.text, Value::Null) || matches!(&prompt.text, Value::String(s) if s.is_empty()) {
            warnings.push(format!("prompt '{}' has no text", prompt.id));
        }

        let defined: HashSet<&str> = prompt.wildcards.iter().map(|w| w.name.as_str()).collect();
        let mut refs = Vec::new();
        collect_wildcard_refs(&prompt.text, &mut refs);
        for name in refs {
            if !defined.contains(name.as_str()) {
                warnings.push(format!(
                    "prompt '{}' references wildcard '__{name}__' that may be undefined (or from ext)",
                    prompt.id
                ));
            }
        }

        let ext_folder = prompt
            .ext
            .clone()
            .or_else(|| doc.defaults.ext.clone())
            .unwrap_or_else(|| "defaults".to_string());
        let mut ext_refs = Vec::new();
        collect_ext_text_refs(&prompt.text, &mut ext_refs);
        for ext_ref in ext_refs {
            let path = ext_dir.join(&ext_folder).join(format!("{ext_ref}.yaml"));
            if !path.exists() {
                warnings.push(format!(
                    "prompt '{}' references ext_text '{ext_ref}' not found under '{ext_folder}'",
                    prompt.id
                ));
            }
        }

        for combo in &prompt.loras {
            for part in combo.split(['+', ' ']).filter(|p| !p.is_empty()) {
                let alias = part.split(':').next().unwrap_or(part);
                if alias != "off" && !loras.contains(alias) {
                    warnings.push(format!(
                        "prompt '{}' references lora alias '{alias}' not defined in 'loras'",
                        prompt.id
                    ));
                }
            }
        }
    }

    let valid = errors.is_empty();
    ValidationReport { valid, warnings, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prompty_jobs::PromptEntry;

    fn doc_with_prompts(prompts: Vec<PromptEntry>) -> JobDocument {
        JobDocument { prompts, ..Default::default() }
    }

    #[test]
    fn empty_prompts_is_a_warning_not_an_error() {
        let doc = doc_with_prompts(vec![]);
        let report = validate_job(&doc, Path::new("/tmp/nonexistent-ext"));
        assert!(report.valid);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn duplicate_ids_are_errors_and_invalidate() {
        let mut a = PromptEntry::default();
        a.id = "p1".to_string();
        a.text = Value::String("hi".to_string());
        let mut b = PromptEntry::default();
        b.id = "p1".to_string();
        b.text = Value::String("hi".to_string());

        let doc = doc_with_prompts(vec![a, b]);
        let report = validate_job(&doc, Path::new("/tmp/nonexistent-ext"));
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn undefined_wildcard_is_a_soft_warning() {
        let mut p = PromptEntry::default();
        p.id = "p1".to_string();
        p.text = Value::String("a __color__ cat".to_string());

        let doc = doc_with_prompts(vec![p]);
        let report = validate_job(&doc, Path::new("/tmp/nonexistent-ext"));
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("__color__")));
    }
}
