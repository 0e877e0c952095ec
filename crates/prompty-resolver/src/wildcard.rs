//! Wildcard placeholder resolution and text-variant consumption modes.
//!
//! Placeholders are `__name__` in a template string, matched with
//! `__([A-Za-z0-9_-]+)__`. A wildcard's values come from an ordered list;
//! resolution either substitutes a single random value, expands the full
//! Cartesian product, or samples N unique values, depending on the caller's
//! consumption mode.

use prompty_core::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn wildcard_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__([A-Za-z0-9_-]+)__").unwrap())
}

/// A named wildcard definition: a name and its ordered list of candidate values.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct WildcardDef {
    pub name: String,
    #[serde(default)]
    pub text: Vec<String>,
}

/// One resolved wildcard pick: the chosen value and its 1-based index into
/// the definition's value list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WildcardPick {
    pub value: String,
    pub index: usize,
}

pub type WildcardUsage = HashMap<String, WildcardPick>;

fn build_lookup(defs: &[WildcardDef]) -> HashMap<&str, &[String]> {
    defs.iter()
        .filter(|d| !d.name.is_empty())
        .map(|d| (d.name.as_str(), d.text.as_slice()))
        .collect()
}

fn placeholders_in(text: &str) -> Vec<String> {
    let mut names: Vec<String> = wildcard_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    names.sort();
    names
}

/// Resolve every `__name__` placeholder in each template to one randomly
/// chosen value from the matching wildcard definition. Placeholder names
/// found in a template are resolved in lexicographic order so that a given
/// seed always consumes the RNG in the same sequence.
pub fn resolve_wildcards(
    templates: &[String],
    defs: &[WildcardDef],
    rng: &mut StdRng,
) -> Result<Vec<(String, WildcardUsage)>> {
    let lookup = build_lookup(defs);
    let mut out = Vec::with_capacity(templates.len());

    for template in templates {
        let names = placeholders_in(template);
        let mut resolved = template.clone();
        let mut usage = WildcardUsage::new();

        for name in names {
            let choices = *lookup.get(name.as_str()).ok_or_else(|| {
                Error::wildcard(format!(
                    "Wildcard '___{name}___' referenced in prompt but not defined in the 'wildcards' section."
                ))
            })?;
            if choices.is_empty() {
                return Err(Error::wildcard(format!(
                    "Wildcard '___{name}___' found but has an empty text list."
                )));
            }
            let idx = rng.gen_range(0..choices.len());
            let value = choices[idx].clone();
            resolved = resolved.replace(&format!("__{name}__"), &value);
            usage.insert(name, WildcardPick { value, index: idx + 1 });
        }

        out.push((resolved, usage));
    }

    Ok(out)
}

/// Expand a single text variant (string or structured content) into a list of
/// strings according to its wildcard consumption mode.
///
/// `mode`: 0 = iterate (Cartesian product of all values), 1 = keep the
/// placeholder unresolved for a later step, N>=2 = pre-sample N unique values
/// per placeholder then Cartesian product.
pub fn process_text_variant(
    template: &str,
    defs: &[WildcardDef],
    mode: i64,
    rng: &mut StdRng,
) -> Result<Vec<String>> {
    let lookup = build_lookup(defs);
    let names = placeholders_in(template);
    if names.is_empty() {
        return Ok(vec![template.to_string()]);
    }

    let mut value_lists: Vec<Vec<String>> = Vec::with_capacity(names.len());
    for name in &names {
        let choices = *lookup.get(name.as_str()).ok_or_else(|| {
            Error::wildcard(format!(
                "Wildcard '___{name}___' referenced in structured prompt but not defined."
            ))
        })?;
        let values = if mode == 0 {
            choices.to_vec()
        } else if mode == 1 {
            vec![format!("__{name}__")]
        } else {
            let n = mode as usize;
            if choices.len() < n {
                choices.to_vec()
            } else {
                let mut pool: Vec<String> = choices.to_vec();
                pool.shuffle(rng);
                pool.truncate(n);
                pool
            }
        };
        value_lists.push(values);
    }

    Ok(cartesian_replace(template, &names, &value_lists))
}

/// Filter an extension text list per the same consumption-mode semantics
/// (0 = all, 1 = one random item, N>=2 = N random unique items).
pub fn apply_text_consumption_mode(items: &[String], mode: i64, rng: &mut StdRng) -> Vec<String> {
    if items.is_empty() {
        return items.to_vec();
    }
    if mode == 0 {
        items.to_vec()
    } else if mode == 1 {
        vec![items.choose(rng).cloned().unwrap()]
    } else {
        let n = mode as usize;
        if items.len() < n {
            items.to_vec()
        } else {
            let mut pool = items.to_vec();
            pool.shuffle(rng);
            pool.truncate(n);
            pool
        }
    }
}

fn cartesian_replace(template: &str, names: &[String], value_lists: &[Vec<String>]) -> Vec<String> {
    let mut combos: Vec<String> = vec![template.to_string()];
    for (name, values) in names.iter().zip(value_lists.iter()) {
        let placeholder = format!("__{name}__");
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                next.push(combo.replace(&placeholder, value));
            }
        }
        combos = next;
    }
    combos
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn defs() -> Vec<WildcardDef> {
        vec![
            WildcardDef { name: "x".into(), text: vec!["1".into(), "2".into()] },
            WildcardDef { name: "y".into(), text: vec!["3".into(), "4".into()] },
        ]
    }

    #[test]
    fn mode_zero_produces_full_cartesian_product() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = process_text_variant("a __x__ and __y__", &defs(), 0, &mut rng).unwrap();
        let mut out = out;
        out.sort();
        assert_eq!(
            out,
            vec![
                "a 1 and 3".to_string(),
                "a 1 and 4".to_string(),
                "a 2 and 3".to_string(),
                "a 2 and 4".to_string(),
            ]
        );
    }

    #[test]
    fn mode_one_keeps_placeholder() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = process_text_variant("a __x__ woman", &defs(), 1, &mut rng).unwrap();
        assert_eq!(out, vec!["a __x__ woman".to_string()]);
    }

    #[test]
    fn undefined_wildcard_is_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = process_text_variant("a __z__ thing", &defs(), 0, &mut rng).unwrap_err();
        assert!(matches!(err, Error::Wildcard(_)));
    }

    #[test]
    fn resolve_wildcards_replaces_all_occurrences_and_tracks_usage() {
        let mut rng = StdRng::seed_from_u64(7);
        let templates = vec!["a __x__ and __x__ again".to_string()];
        let (resolved, usage) = resolve_wildcards(&templates, &defs(), &mut rng).unwrap().remove(0);
        let picked = &usage["x"].value;
        assert_eq!(resolved, format!("a {picked} and {picked} again"));
    }

    #[test]
    fn no_placeholders_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = process_text_variant("plain text", &defs(), 0, &mut rng).unwrap();
        assert_eq!(out, vec!["plain text".to_string()]);
    }
}
