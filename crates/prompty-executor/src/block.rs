//! Block table — groups the flat job-record list by `block_path`, the unit
//! the tree executor schedules and caches against.

use prompty_core::BlockPath;
use prompty_jobs::JobRecord;
use std::collections::HashMap;

pub struct Block {
    pub path: BlockPath,
    pub parent_path: Option<BlockPath>,
    pub depends_on: Vec<String>,
    pub compositions: usize,
    pub jobs: Vec<JobRecord>,
}

pub type BlockTable = HashMap<BlockPath, Block>;

/// Groups records by `block_path`. The `depends_on` recorded per block is
/// the dedup'd union across every record sharing that path — in practice
/// all records at one path come from the same prompt and already agree,
/// but a defensive union costs nothing.
pub fn build_block_table(jobs: Vec<JobRecord>) -> BlockTable {
    let mut table: BlockTable = HashMap::new();

    for job in jobs {
        let entry = table.entry(job.block_path.clone()).or_insert_with(|| Block {
            path: job.block_path.clone(),
            parent_path: job.parent_path.clone(),
            depends_on: Vec::new(),
            compositions: 0,
            jobs: Vec::new(),
        });

        for dep in &job.depends_on {
            if !entry.depends_on.contains(dep) {
                entry.depends_on.push(dep.clone());
            }
        }
        entry.jobs.push(job);
    }

    for block in table.values_mut() {
        block.compositions = block.jobs.len();
    }

    table
}

/// Lex-sorted child block paths for every parent, built once at init.
pub fn build_children_index(blocks: &BlockTable) -> HashMap<BlockPath, Vec<BlockPath>> {
    let mut index: HashMap<BlockPath, Vec<BlockPath>> = HashMap::new();
    for block in blocks.values() {
        if let Some(parent) = &block.parent_path {
            if blocks.contains_key(parent) {
                index.entry(parent.clone()).or_default().push(block.path.clone());
            }
        }
    }
    for children in index.values_mut() {
        children.sort();
    }
    index
}

/// A block is a root if it has no parent path, or its named parent isn't
/// present in the table — the latter arises when nested `after` folds a
/// parent's text into its children via Cartesian product, leaving the
/// parent with zero standalone compositions.
pub fn find_roots(blocks: &BlockTable) -> Vec<BlockPath> {
    let mut roots: Vec<BlockPath> = blocks
        .values()
        .filter(|b| match &b.parent_path {
            None => true,
            Some(p) => !blocks.contains_key(p),
        })
        .map(|b| b.path.clone())
        .collect();
    roots.sort();
    roots
}
