//! Queue construction: topologically sort root blocks by `depends_on`, then
//! depth-first-emit every composition of every block under each root in
//! turn, honouring the child/parent composition distribution invariant.

use crate::block::{build_children_index, find_roots, BlockTable};
use prompty_core::BlockPath;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub block_path: BlockPath,
    pub composition_idx: usize,
    pub parent_key: Option<String>,
}

pub fn build_queue(blocks: &BlockTable) -> Vec<QueueEntry> {
    let roots = find_roots(blocks);
    let children_index = build_children_index(blocks);
    let ordered_roots = topo_sort_roots(&roots, blocks);

    let mut queue = Vec::new();
    for root in &ordered_roots {
        let Some(block) = blocks.get(root) else { continue };
        for i in 0..block.compositions {
            enqueue_subtree(root, i, None, blocks, &children_index, &mut queue);
        }
    }
    queue
}

fn enqueue_subtree(
    block_path: &BlockPath,
    composition_idx: usize,
    parent_key: Option<String>,
    blocks: &BlockTable,
    children_index: &HashMap<BlockPath, Vec<BlockPath>>,
    queue: &mut Vec<QueueEntry>,
) {
    queue.push(QueueEntry {
        block_path: block_path.clone(),
        composition_idx,
        parent_key,
    });

    let Some(block) = blocks.get(block_path) else { return };
    let Some(children) = children_index.get(block_path) else { return };

    for child_path in children {
        let Some(child) = blocks.get(child_path) else { continue };
        if block.compositions == 0 {
            continue;
        }
        let per_parent = child.compositions / block.compositions;
        let start = composition_idx * per_parent;
        let key = format!("{block_path}:{composition_idx}");
        for child_idx in start..start + per_parent {
            enqueue_subtree(child_path, child_idx, Some(key.clone()), blocks, children_index, queue);
        }
    }
}

/// Find the root subtree that owns `dep_path`: walk up its dotted segments
/// looking for a prefix that is itself a known root.
fn find_root_for(dep_path: &str, root_set: &HashSet<BlockPath>) -> Option<BlockPath> {
    let segments: Vec<&str> = dep_path.split('.').collect();
    for end in (1..=segments.len()).rev() {
        let candidate = BlockPath::new(segments[..end].join("."));
        if root_set.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Kahn's algorithm over root-to-root `depends_on` edges, with sorted
/// insertion so ties resolve lexicographically. On a cycle, falls back to
/// lex-sorted roots — cyclic `depends_on` is logged, not fatal.
fn topo_sort_roots(roots: &[BlockPath], blocks: &BlockTable) -> Vec<BlockPath> {
    let root_set: HashSet<BlockPath> = roots.iter().cloned().collect();

    // edges: predecessor -> successors (predecessor must run first)
    let mut successors: HashMap<BlockPath, Vec<BlockPath>> = HashMap::new();
    let mut in_degree: HashMap<BlockPath, usize> = roots.iter().map(|r| (r.clone(), 0)).collect();

    for root in roots {
        let Some(block) = blocks.get(root) else { continue };
        for dep in &block.depends_on {
            let Some(predecessor) = find_root_for(dep, &root_set) else { continue };
            if &predecessor == root {
                continue;
            }
            let list = successors.entry(predecessor).or_default();
            if !list.contains(root) {
                list.push(root.clone());
                *in_degree.get_mut(root).unwrap() += 1;
            }
        }
    }

    let mut ready: VecDeque<BlockPath> = VecDeque::new();
    let mut sorted_ready: Vec<BlockPath> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(r, _)| r.clone())
        .collect();
    sorted_ready.sort();
    ready.extend(sorted_ready);

    let mut order = Vec::with_capacity(roots.len());
    while let Some(node) = ready.pop_front() {
        order.push(node.clone());
        if let Some(succ) = successors.get(&node) {
            let mut newly_ready = Vec::new();
            for s in succ {
                let deg = in_degree.get_mut(s).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(s.clone());
                }
            }
            newly_ready.sort();
            // Insert maintaining overall lexicographic tiering: merge with
            // existing ready queue then re-sort the whole remaining front.
            for n in newly_ready {
                ready.push_back(n);
            }
            let mut remaining: Vec<BlockPath> = ready.drain(..).collect();
            remaining.sort();
            ready.extend(remaining);
        }
    }

    if order.len() != roots.len() {
        tracing::warn!("cyclic depends_on among root blocks; falling back to lexicographic order");
        let mut fallback = roots.to_vec();
        fallback.sort();
        return fallback;
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::build_block_table;
    use prompty_jobs::{JobRecord, Params, PromptResult};
    use prompty_loras::LoraConfig;
    use prompty_resolver::WildcardUsage;
    use serde_json::Map;
    use std::collections::HashMap as StdHashMap;

    fn record(block_path: &str, parent: Option<&str>, depends_on: Vec<&str>) -> JobRecord {
        JobRecord {
            prompt: PromptResult {
                id: "p".to_string(),
                text: "t".to_string(),
                template: "t".to_string(),
                annotations: Map::new(),
            },
            loras: Vec::<LoraConfig>::new(),
            filename_suffix: String::new(),
            sampler: None,
            scheduler: None,
            params: Params::default(),
            sampler_params: Map::new(),
            original_index: 1,
            block_path: BlockPath::new(block_path),
            parent_path: parent.map(BlockPath::new),
            depends_on: depends_on.into_iter().map(str::to_string).collect(),
            wildcard_usage: WildcardUsage::new(),
            ext_indices: StdHashMap::new(),
            is_leaf: true,
            resolution_expressions: None,
            hooks_config: StdHashMap::new(),
        }
    }

    #[test]
    fn single_root_single_composition() {
        let blocks = build_block_table(vec![record("0", None, vec![])]);
        let queue = build_queue(&blocks);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].block_path.as_str(), "0");
        assert!(queue[0].parent_key.is_none());
    }

    #[test]
    fn child_distributes_across_parent_compositions() {
        let blocks = build_block_table(vec![
            record("0", None, vec![]),
            record("0", None, vec![]),
            record("0.0", Some("0"), vec![]),
            record("0.0", Some("0"), vec![]),
            record("0.0", Some("0"), vec![]),
            record("0.0", Some("0"), vec![]),
        ]);
        let queue = build_queue(&blocks);
        assert_eq!(queue.len(), 6);
        let parent_keys: Vec<Option<String>> =
            queue.iter().filter(|e| e.block_path.as_str() == "0.0").map(|e| e.parent_key.clone()).collect();
        assert_eq!(parent_keys, vec![Some("0:0".to_string()), Some("0:0".to_string()), Some("0:1".to_string()), Some("0:1".to_string())]);
    }

    #[test]
    fn depends_on_orders_roots_and_ties_break_lexicographically() {
        let blocks = build_block_table(vec![
            record("b", None, vec!["a"]),
            record("a", None, vec![]),
            record("c", None, vec![]),
        ]);
        let queue = build_queue(&blocks);
        let order: Vec<&str> = queue.iter().map(|e| e.block_path.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
