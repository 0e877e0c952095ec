//! LoRA combination-string grammar, strength-range generation, and the
//! filename-suffix builder used by the job expander's permutation phase.
//!
//! Grammar: `combo := lora ("+" lora)*`, `lora := alias (":" spec)?`,
//! `spec := "off" | number | number "~~" number`.

use prompty_core::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoraLibraryEntry {
    pub path: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub triggers: Vec<String>,
}

fn default_strength() -> f64 {
    1.0
}

pub type LoraLibrary = HashMap<String, LoraLibraryEntry>;

/// One resolved LoRA application: a single alias/strength/trigger combination,
/// ready to become part of a job record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoraConfig {
    pub alias: String,
    pub path: String,
    pub strength: f64,
    pub trigger: String,
    pub trigger_idx: usize,
    pub suffix_part: String,
    pub remove_trigger: bool,
}

/// Generate evenly spaced values from `start` to `end` inclusive, rounded to
/// 3 decimal places. Uses linear interpolation (not repeated addition) to
/// avoid cumulative floating-point error. Returns `[start]` when `end` is
/// `None` or equal to `start`.
pub fn generate_range_values(start: f64, end: Option<f64>, increment: f64) -> Vec<f64> {
    let Some(end) = end else {
        return vec![round3(start)];
    };
    if (start - end).abs() < f64::EPSILON {
        return vec![round3(start)];
    }

    let increment = increment.max(0.001);
    let diff = end - start;
    let num_steps = if diff.abs() < increment {
        2
    } else {
        ((diff.abs() / increment).round() as i64 + 1).max(1) as usize
    };

    if num_steps == 1 {
        return vec![round3(start)];
    }

    (0..num_steps)
        .map(|i| round3(start + i as f64 * (end - start) / (num_steps - 1) as f64))
        .collect()
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Number of decimal places to format a strength value with, derived from the
/// configured range increment (e.g. `0.1` -> 1, `0.05` -> 2).
pub fn precision_from_increment(increment: f64) -> usize {
    let s = format!("{increment}");
    match s.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len().max(1),
        None => 1,
    }
}

/// Parse one LoRA combination string (e.g. `"lora1:0.5~~1.0+lora2:0.8"`)
/// against a library of known aliases, producing one array of candidate
/// configs per named LoRA. The caller takes the Cartesian product of these
/// arrays (`generate_job_permutations`) to realise every permutation.
pub fn parse_lora_combination_string(
    combo: &str,
    library: &LoraLibrary,
    range_increment: f64,
) -> Vec<Vec<LoraConfig>> {
    let precision = precision_from_increment(range_increment);
    let mut arrays = Vec::new();

    for part in combo.split('+') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (alias, spec) = match part.split_once(':') {
            Some((a, s)) => (a, Some(s.trim().to_lowercase())),
            None => (part, None),
        };

        let Some(entry) = library.get(alias) else {
            tracing::warn!(alias, "LoRA alias not found in config, skipping");
            continue;
        };

        let mut is_off = false;
        let strengths: Vec<f64> = match spec.as_deref() {
            Some("off") => {
                is_off = true;
                vec![0.0]
            }
            Some("0") | Some("0.0") => vec![0.0],
            Some(s) if s.contains("~~") => {
                let (a, b) = s.split_once("~~").unwrap();
                let start: f64 = a.trim().parse().unwrap_or(entry.strength);
                let end: f64 = b.trim().parse().unwrap_or(start);
                generate_range_values(start, Some(end), range_increment)
            }
            Some(s) => vec![s.parse::<f64>().unwrap_or(entry.strength)],
            None => vec![entry.strength],
        };

        let base_triggers: Vec<String> = if entry.triggers.is_empty() {
            vec![String::new()]
        } else {
            entry.triggers.clone()
        };

        let mut configs_for_this_lora = Vec::new();
        for strength in strengths {
            let base_suffix = if is_off {
                format!("lora_{alias}[off]")
            } else {
                format!("lora_{alias}[{strength:.precision$}]")
            };

            if is_off {
                configs_for_this_lora.push(LoraConfig {
                    alias: alias.to_string(),
                    path: entry.path.clone(),
                    strength,
                    trigger: String::new(),
                    trigger_idx: 0,
                    suffix_part: base_suffix,
                    remove_trigger: true,
                });
            } else {
                for (idx, trigger) in base_triggers.iter().enumerate() {
                    configs_for_this_lora.push(LoraConfig {
                        alias: alias.to_string(),
                        path: entry.path.clone(),
                        strength,
                        trigger: trigger.clone(),
                        trigger_idx: idx + 1,
                        suffix_part: format!("{base_suffix}[{}]", idx + 1),
                        remove_trigger: false,
                    });
                }
            }
        }

        if !configs_for_this_lora.is_empty() {
            arrays.push(configs_for_this_lora);
        }
    }

    arrays
}

/// Cartesian product of the per-LoRA candidate arrays into complete job
/// permutations, each carrying its combined filename suffix.
pub fn generate_job_permutations(arrays: &[Vec<LoraConfig>]) -> Vec<(Vec<LoraConfig>, String)> {
    if arrays.is_empty() {
        return Vec::new();
    }
    let mut combos: Vec<Vec<LoraConfig>> = vec![Vec::new()];
    for array in arrays {
        let mut next = Vec::with_capacity(combos.len() * array.len());
        for combo in &combos {
            for cfg in array {
                let mut extended = combo.clone();
                extended.push(cfg.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    combos
        .into_iter()
        .map(|loras| {
            let suffix = loras
                .iter()
                .map(|l| l.suffix_part.as_str())
                .collect::<Vec<_>>()
                .join("_");
            (loras, suffix)
        })
        .collect()
}

/// Signature string used to sort the final job list for LoRA-loading locality:
/// `"_".join(f"{alias}{strength:.3g}" for l in loras)`.
pub fn lora_signature(loras: &[LoraConfig]) -> String {
    loras
        .iter()
        .map(|l| format!("{}{}", l.alias, format_g3(l.strength)))
        .collect::<Vec<_>>()
        .join("_")
}

/// Approximates Python's `%.3g` formatting: 3 significant digits, trailing
/// zeros trimmed.
fn format_g3(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let s = format!("{v:.3e}");
    let (mantissa, exp) = s.split_once('e').unwrap();
    let exp: i32 = exp.parse().unwrap();
    let value = v;
    if !(-4..3).contains(&exp) {
        let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
        format!("{trimmed}e{exp}")
    } else {
        let formatted = format!("{value:.*}", (2 - exp).max(0) as usize);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        trimmed.to_string()
    }
}

pub fn parse_combo_error(combo: &str) -> Error {
    Error::lora(format!("malformed LoRA combination string: '{combo}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> LoraLibrary {
        let mut lib = LoraLibrary::new();
        lib.insert(
            "lora1".to_string(),
            LoraLibraryEntry {
                path: "/loras/lora1.safetensors".into(),
                strength: 1.0,
                triggers: vec!["trigger phrase".into()],
            },
        );
        lib
    }

    #[test]
    fn generate_range_values_matches_expected_step_count() {
        let vals = generate_range_values(0.5, Some(1.0), 0.1);
        assert_eq!(vals.len(), 6);
        assert_eq!(vals[0], 0.5);
        assert_eq!(*vals.last().unwrap(), 1.0);
    }

    #[test]
    fn generate_range_values_single_value_when_no_end() {
        assert_eq!(generate_range_values(0.5, None, 0.1), vec![0.5]);
    }

    #[test]
    fn precision_from_increment_examples() {
        assert_eq!(precision_from_increment(0.1), 1);
        assert_eq!(precision_from_increment(0.05), 2);
        assert_eq!(precision_from_increment(1.0), 1);
    }

    #[test]
    fn parse_range_combo_expands_strengths() {
        let arrays = parse_lora_combination_string("lora1:0.5~~0.7", &library(), 0.1);
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].len(), 3);
        assert_eq!(arrays[0][0].suffix_part, "lora_lora1[0.5][1]");
    }

    #[test]
    fn off_combo_drops_triggers() {
        let arrays = parse_lora_combination_string("lora1:off", &library(), 0.1);
        assert_eq!(arrays[0].len(), 1);
        assert!(arrays[0][0].remove_trigger);
        assert_eq!(arrays[0][0].suffix_part, "lora_lora1[off]");
    }

    #[test]
    fn unknown_alias_is_skipped_not_fatal() {
        let arrays = parse_lora_combination_string("ghost:1.0", &library(), 0.1);
        assert!(arrays.is_empty());
    }

    #[test]
    fn permutations_combine_multiple_loras() {
        let mut lib = library();
        lib.insert(
            "lora2".to_string(),
            LoraLibraryEntry { path: "/loras/lora2.safetensors".into(), strength: 0.8, triggers: vec![] },
        );
        let a1 = parse_lora_combination_string("lora1", &lib, 0.1);
        let a2 = parse_lora_combination_string("lora2", &lib, 0.1);
        let combined: Vec<Vec<LoraConfig>> = a1.into_iter().chain(a2).collect();
        let perms = generate_job_permutations(&combined);
        assert_eq!(perms.len(), 1);
        assert_eq!(perms[0].1, "lora_lora1[1.0][1]_lora_lora2[0.8][1]");
    }
}
