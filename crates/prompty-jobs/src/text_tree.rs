//! Recursive nested `content` / `ext_text` / `after` text-tree expansion.
//!
//! Ports the structured side of the expander's text permutation (the
//! `build_text_variations` algorithm): a node's own wildcard/ext_text
//! combinations become additional *compositions* of the same block, while
//! each `after` array forks into separate *child blocks*, one per ordinal
//! in that array (a single, non-forking child stays at its parent's path —
//! there being only one choice to number, no path segment is consumed).

use crate::document::TextNode;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn wildcard_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__([A-Za-z0-9_-]+)__").unwrap())
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

/// One expanded leaf or intermediate variation of the text tree.
#[derive(Clone, Debug)]
pub struct Variation {
    pub text: String,
    pub template: String,
    pub ext_indices: HashMap<String, usize>,
    pub wildcard_indices: HashMap<String, usize>,
    pub wildcard_positions: HashMap<String, usize>,
    pub is_leaf: bool,
    /// Ordinal path, relative to the prompt's root block. `[]` means the
    /// variation belongs to the root block itself.
    pub path: Vec<usize>,
}

/// Expand every `__name__` placeholder found in `text` according to the
/// effective `wildcards_max` consumption mode, tracking the chosen index of
/// each resolved placeholder (absent from `wildcard_lookup` placeholders are
/// left in literal form and excluded from the index map — not an error,
/// since nested-text wildcards may be intentionally deferred).
fn expand_wildcards(
    text: &str,
    wildcards_max: i64,
    wildcard_lookup: &HashMap<String, Vec<String>>,
    rng: &mut StdRng,
) -> Vec<(String, HashMap<String, usize>)> {
    let names = placeholders_in(text);
    if names.is_empty() {
        return vec![(text.to_string(), HashMap::new())];
    }

    // Per-placeholder candidate (value, Some(index)) lists; None index marks
    // an unresolved/unknown wildcard left as a literal placeholder.
    let mut per_name: Vec<(String, Vec<(String, Option<usize>)>)> = Vec::with_capacity(names.len());
    for name in &names {
        let values = match wildcard_lookup.get(name) {
            None => vec![(format!("__{name}__"), None)],
            Some(values) => {
                if wildcards_max > 0 && (values.len() as i64) > wildcards_max {
                    if wildcards_max == 1 {
                        let idx = rng.gen_range(0..values.len());
                        vec![(values[idx].clone(), Some(idx))]
                    } else {
                        let n = wildcards_max as usize;
                        let mut indexed: Vec<(usize, String)> =
                            values.iter().cloned().enumerate().collect();
                        indexed.shuffle(rng);
                        indexed.truncate(n);
                        indexed.into_iter().map(|(i, v)| (v, Some(i))).collect()
                    }
                } else {
                    values.iter().cloned().enumerate().map(|(i, v)| (v, Some(i))).collect()
                }
            }
        };
        per_name.push((name.clone(), values));
    }

    let mut combos: Vec<(String, HashMap<String, usize>)> = vec![(text.to_string(), HashMap::new())];
    for (name, values) in &per_name {
        let placeholder = format!("__{name}__");
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for (combo_text, combo_indices) in &combos {
            for (value, idx) in values {
                let mut indices = combo_indices.clone();
                if let Some(i) = idx {
                    indices.insert(name.clone(), *i);
                }
                next.push((combo_text.replace(&placeholder, value), indices));
            }
        }
        combos = next;
    }
    combos
}

/// Join two text fragments with "smart spacing": a single space is inserted
/// only when neither side already ends/starts with a separator character.
fn smart_join(left: &str, right: &str) -> String {
    if left.is_empty() || right.is_empty() {
        return format!("{left}{right}");
    }
    let left_sep = left
        .trim_end_matches(|c: char| c == ',' || c == ' ' || c == '\n' || c == '\t')
        .len()
        != left.len();
    let right_sep = right
        .trim_start_matches(|c: char| c == ',' || c == ' ' || c == '\n' || c == '\t')
        .len()
        != right.len();
    if !left_sep && !right_sep {
        format!("{} {}", left.trim_end(), right.trim_start())
    } else {
        format!("{left}{right}")
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_text_variations(
    items: &[TextNode],
    ext_texts: &HashMap<String, Vec<String>>,
    ext_text_max: i64,
    wildcards_max: i64,
    wildcard_lookup: &HashMap<String, Vec<String>>,
    path: &[usize],
    current_level: usize,
    default_leaf: bool,
    rng: &mut StdRng,
) -> Vec<Variation> {
    if items.is_empty() {
        return vec![Variation {
            text: String::new(),
            template: String::new(),
            ext_indices: HashMap::new(),
            wildcard_indices: HashMap::new(),
            wildcard_positions: HashMap::new(),
            is_leaf: false,
            path: path.to_vec(),
        }];
    }

    let mut results = Vec::new();
    let item_level = current_level + 1;

    for (item_idx, item) in items.iter().enumerate() {
        let child_path = if items.len() > 1 {
            let mut p = path.to_vec();
            p.push(item_idx);
            p
        } else {
            path.to_vec()
        };

        let mut base: Vec<Variation> = Vec::new();

        if let Some(content) = &item.content {
            let names = placeholders_in(content);
            let positions: HashMap<String, usize> =
                names.iter().map(|n| (n.clone(), item_level)).collect();
            if names.is_empty() || wildcard_lookup.is_empty() {
                base.push(Variation {
                    text: content.clone(),
                    template: content.clone(),
                    ext_indices: HashMap::new(),
                    wildcard_indices: HashMap::new(),
                    wildcard_positions: positions,
                    is_leaf: false,
                    path: child_path.clone(),
                });
            } else {
                for (expanded, wc_indices) in expand_wildcards(content, wildcards_max, wildcard_lookup, rng) {
                    base.push(Variation {
                        text: expanded,
                        template: content.clone(),
                        ext_indices: HashMap::new(),
                        wildcard_indices: wc_indices,
                        wildcard_positions: positions.clone(),
                        is_leaf: false,
                        path: child_path.clone(),
                    });
                }
            }
        } else if let Some(ext_name) = &item.ext_text {
            let values = ext_texts.get(ext_name).cloned().unwrap_or_default();
            if values.is_empty() {
                tracing::warn!(ext_text = %ext_name, "ext_text not found or empty");
                base.push(Variation {
                    text: String::new(),
                    template: String::new(),
                    ext_indices: HashMap::new(),
                    wildcard_indices: HashMap::new(),
                    wildcard_positions: HashMap::new(),
                    is_leaf: false,
                    path: child_path.clone(),
                });
            } else {
                let selected: Vec<(String, usize)> = select_ext_values(&values, ext_text_max, rng);
                for (value, one_based_idx) in selected {
                    let names = placeholders_in(&value);
                    let positions: HashMap<String, usize> =
                        names.iter().map(|n| (n.clone(), item_level)).collect();
                    if names.is_empty() || wildcard_lookup.is_empty() {
                        let mut ext_indices = HashMap::new();
                        ext_indices.insert(ext_name.clone(), one_based_idx);
                        base.push(Variation {
                            text: value.clone(),
                            template: value.clone(),
                            ext_indices,
                            wildcard_indices: HashMap::new(),
                            wildcard_positions: positions,
                            is_leaf: false,
                            path: child_path.clone(),
                        });
                    } else {
                        for (expanded, wc_indices) in
                            expand_wildcards(&value, wildcards_max, wildcard_lookup, rng)
                        {
                            let mut ext_indices = HashMap::new();
                            ext_indices.insert(ext_name.clone(), one_based_idx);
                            base.push(Variation {
                                text: expanded,
                                template: value.clone(),
                                ext_indices,
                                wildcard_indices: wc_indices,
                                wildcard_positions: positions.clone(),
                                is_leaf: false,
                                path: child_path.clone(),
                            });
                        }
                    }
                }
            }
        } else {
            continue;
        }

        if !item.after.is_empty() {
            let suffixes = build_text_variations(
                &item.after,
                ext_texts,
                ext_text_max,
                wildcards_max,
                wildcard_lookup,
                &child_path,
                item_level,
                default_leaf,
                rng,
            );

            let item_is_leaf = item.checkpoint.unwrap_or(default_leaf);
            let mut joined = Vec::new();
            for b in &base {
                for s in &suffixes {
                    let mut ext_indices = b.ext_indices.clone();
                    ext_indices.extend(s.ext_indices.clone());
                    let mut wc_indices = b.wildcard_indices.clone();
                    wc_indices.extend(s.wildcard_indices.clone());
                    let mut wc_positions = b.wildcard_positions.clone();
                    wc_positions.extend(s.wildcard_positions.clone());

                    joined.push(Variation {
                        text: smart_join(&b.text, &s.text),
                        template: smart_join(&b.template, &s.template),
                        ext_indices,
                        wildcard_indices: wc_indices,
                        wildcard_positions: wc_positions,
                        is_leaf: s.is_leaf,
                        path: s.path.clone(),
                    });
                }
            }

            if item_is_leaf {
                let mut base_as_leaf: Vec<Variation> = base
                    .into_iter()
                    .map(|mut v| {
                        v.is_leaf = true;
                        v
                    })
                    .collect();
                base_as_leaf.append(&mut joined);
                results.extend(base_as_leaf);
            } else {
                results.extend(joined);
            }
        } else {
            let item_is_leaf = item.checkpoint.unwrap_or(true);
            for mut v in base {
                v.is_leaf = item_is_leaf;
                results.push(v);
            }
        }
    }

    if results.is_empty() {
        vec![Variation {
            text: String::new(),
            template: String::new(),
            ext_indices: HashMap::new(),
            wildcard_indices: HashMap::new(),
            wildcard_positions: HashMap::new(),
            is_leaf: false,
            path: path.to_vec(),
        }]
    } else {
        results
    }
}

/// Apply the `ext_text_max` consumption mode to an extension's text list,
/// returning `(value, 1-based index into the original list)` pairs.
fn select_ext_values(values: &[String], mode: i64, rng: &mut StdRng) -> Vec<(String, usize)> {
    if mode > 0 && (values.len() as i64) > mode {
        (0..mode as usize).map(|i| (values[i].clone(), i + 1)).collect()
    } else {
        values.iter().cloned().enumerate().map(|(i, v)| (v, i + 1)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TextNode;
    use rand::SeedableRng;

    fn content_node(text: &str, after: Vec<TextNode>, checkpoint: Option<bool>) -> TextNode {
        TextNode {
            content: Some(text.to_string()),
            ext_text: None,
            after,
            checkpoint,
            annotations: Default::default(),
        }
    }

    #[test]
    fn terminal_node_auto_checkpoints() {
        let mut rng = StdRng::seed_from_u64(1);
        let items = vec![content_node("hello", vec![], None)];
        let out = build_text_variations(&items, &HashMap::new(), 0, 0, &HashMap::new(), &[], 0, false, &mut rng);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_leaf);
        assert_eq!(out[0].path, Vec::<usize>::new());
    }

    #[test]
    fn two_after_children_fork_into_two_blocks() {
        let mut rng = StdRng::seed_from_u64(1);
        let items = vec![content_node(
            "parent",
            vec![
                content_node("childA", vec![], None),
                content_node("childB", vec![], None),
            ],
            None,
        )];
        let out = build_text_variations(&items, &HashMap::new(), 0, 0, &HashMap::new(), &[], 0, false, &mut rng);
        assert_eq!(out.len(), 2);
        let paths: HashSet<_> = out.iter().map(|v| v.path.clone()).collect();
        assert!(paths.contains(&vec![0usize]));
        assert!(paths.contains(&vec![1usize]));
        for v in &out {
            assert!(v.text.starts_with("parent"));
        }
    }

    #[test]
    fn explicit_checkpoint_true_keeps_parent_and_children() {
        let mut rng = StdRng::seed_from_u64(1);
        let items = vec![content_node(
            "waving",
            vec![content_node("sitting", vec![], None)],
            Some(true),
        )];
        let out = build_text_variations(&items, &HashMap::new(), 0, 0, &HashMap::new(), &[], 0, false, &mut rng);
        let texts: Vec<&str> = out.iter().map(|v| v.text.as_str()).collect();
        assert!(texts.contains(&"waving"));
        assert!(texts.contains(&"waving sitting"));
    }

    #[test]
    fn wildcard_expansion_inside_content_produces_cartesian_product() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut lookup = HashMap::new();
        lookup.insert("x".to_string(), vec!["1".to_string(), "2".to_string()]);
        let items = vec![content_node("a __x__ thing", vec![], None)];
        let out = build_text_variations(&items, &HashMap::new(), 0, 0, &lookup, &[], 0, false, &mut rng);
        assert_eq!(out.len(), 2);
    }
}
