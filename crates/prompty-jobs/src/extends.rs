//! `extends` directive resolution — merges wildcard/lora/text data from the
//! global extension table into a single prompt before text expansion runs.

use prompty_core::{Error, Result};
use prompty_extensions::{find_extension, is_dynamic_text_key, resolve_extension, ExtensionTable};
use prompty_resolver::{apply_text_consumption_mode, WildcardDef};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;

/// Outcome of resolving one prompt's `extends` list: merged wildcard
/// definitions, merged LoRA combination strings, and extra text values
/// routed into named components (default component is `"text"`).
#[derive(Default)]
pub struct ExtendsResult {
    pub wildcards: Vec<WildcardDef>,
    pub lora_combos: Vec<String>,
    pub text_components: HashMap<String, Vec<String>>,
}

struct ParsedPath {
    ext_id: String,
    ext_key: Option<String>,
    is_random: bool,
    target_key: Option<String>,
}

fn parse_extends_entry(raw: &str) -> Result<ParsedPath> {
    let (source_path, target_key) = match raw.split_once(':') {
        Some((s, t)) => (s.trim(), Some(t.trim().to_string())),
        None => (raw, None),
    };
    if let Some(t) = &target_key {
        if !is_dynamic_text_key(t) {
            return Err(Error::extension(format!(
                "extends '{raw}': explicit target key '{t}' must be a dynamic text key (text, textN)"
            )));
        }
    }

    let mut parts: Vec<&str> = source_path.split('.').collect();
    let is_random = parts.last() == Some(&"one");
    if is_random {
        parts.pop();
    }

    let (ext_id, ext_key) = match parts.as_slice() {
        [id] => (id.to_string(), None),
        [id, key] => (id.to_string(), Some(key.to_string())),
        _ => {
            return Err(Error::extension(format!(
                "invalid extends source path: '{source_path}'"
            )))
        }
    };

    Ok(ParsedPath { ext_id, ext_key, is_random, target_key })
}

pub fn resolve_extends(
    entries: &[String],
    namespace: &str,
    table: &ExtensionTable,
    current_wildcards: &[WildcardDef],
    ext_text_max: i64,
    rng: &mut StdRng,
) -> Result<ExtendsResult> {
    let mut result = ExtendsResult { wildcards: current_wildcards.to_vec(), ..Default::default() };

    for raw in entries {
        let parsed = parse_extends_entry(raw)?;

        let found = find_extension(&parsed.ext_id, namespace, table)
            .ok_or_else(|| Error::extension(format!("extension id '{}' not found", parsed.ext_id)))?;

        let is_wildcard_target =
            parsed.ext_key.as_deref() == Some("wildcards") || (parsed.ext_key.is_none() && !parsed.is_random);
        let is_loras_target = parsed.ext_key.as_deref() == Some("loras") || parsed.ext_key.is_none();

        if is_wildcard_target {
            if parsed.target_key.is_some() {
                return Err(Error::extension(format!(
                    "extends '{raw}': wildcard definitions cannot be mapped to a different target key"
                )));
            }
            if !found.wildcards.is_empty() {
                let mut by_name: HashMap<String, usize> = result
                    .wildcards
                    .iter()
                    .enumerate()
                    .map(|(i, w)| (w.name.clone(), i))
                    .collect();
                for incoming in &found.wildcards {
                    match by_name.get(&incoming.name) {
                        Some(&i) => {
                            for text in &incoming.text {
                                if !result.wildcards[i].text.contains(text) {
                                    result.wildcards[i].text.push(text.clone());
                                }
                            }
                        }
                        None => {
                            by_name.insert(incoming.name.clone(), result.wildcards.len());
                            result.wildcards.push(incoming.clone());
                        }
                    }
                }
            } else if parsed.ext_key.as_deref() == Some("wildcards") {
                return Err(Error::extension(format!(
                    "extends '{raw}' explicitly requested 'wildcards', but none were found"
                )));
            }
        }

        if is_loras_target {
            if parsed.target_key.is_some() {
                return Err(Error::extension(format!(
                    "extends '{raw}': LoRA combinations cannot be mapped to a dynamic text key"
                )));
            }
            if let Some(serde_json::Value::Array(items)) = found.fields.get("loras") {
                let combos: Vec<String> =
                    items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
                if parsed.is_random && parsed.ext_key.as_deref() == Some("loras") {
                    if let Some(pick) = combos.choose(rng) {
                        result.lora_combos.push(pick.clone());
                    }
                } else {
                    result.lora_combos.extend(combos);
                }
            } else if parsed.ext_key.as_deref() == Some("loras") {
                return Err(Error::extension(format!(
                    "extends '{raw}' explicitly requested 'loras', but none were found"
                )));
            }
        }

        if !matches!(parsed.ext_key.as_deref(), Some("wildcards") | Some("loras")) {
            let source_path = match parsed.ext_key {
                Some(ref key) => format!("{}.{}{}", parsed.ext_id, key, if parsed.is_random { ".one" } else { "" }),
                None => format!("{}{}", parsed.ext_id, if parsed.is_random { ".one" } else { "" }),
            };
            let mut extended = resolve_extension(&source_path, namespace, table, rng)?;
            extended = apply_text_consumption_mode(&extended, ext_text_max, rng);

            let target = parsed
                .target_key
                .clone()
                .or(parsed.ext_key.clone())
                .unwrap_or_else(|| "text".to_string());
            result.text_components.entry(target).or_default().append(&mut extended);
        }
    }

    Ok(result)
}
