//! Dotted-integer block-path identifier.
//!
//! Root is `"0"`; each `after` child extends its parent with `.K`. Cheaply
//! cloneable, since every queue entry and
//! hook-context snapshot carries one.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockPath(Arc<str>);

impl BlockPath {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn root(index: usize) -> Self {
        Self::new(index.to_string())
    }

    pub fn child(&self, ordinal: usize) -> Self {
        Self::new(format!("{}.{}", self.0, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments as parsed integers, in root-to-leaf order.
    pub fn segments(&self) -> Vec<usize> {
        self.0.split('.').filter_map(|s| s.parse().ok()).collect()
    }

    /// The path of this block's parent, or `None` if this is a root (`"0"`, `"3"`, ...).
    pub fn parent(&self) -> Option<BlockPath> {
        let s = self.0.as_ref();
        s.rfind('.').map(|idx| BlockPath::new(&s[..idx]))
    }

    pub fn depth(&self) -> usize {
        self.segments().len().saturating_sub(1)
    }

    /// True if `other` is a descendant of (or equal to) `self`.
    pub fn is_ancestor_of(&self, other: &BlockPath) -> bool {
        if self.0.as_ref() == other.0.as_ref() {
            return true;
        }
        other.0.starts_with(self.0.as_ref()) && other.0.as_bytes().get(self.0.len()) == Some(&b'.')
    }
}

impl std::fmt::Display for BlockPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BlockPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_extends_with_dot() {
        let root = BlockPath::root(0);
        let child = root.child(2);
        assert_eq!(child.as_str(), "0.2");
        assert_eq!(child.parent().unwrap().as_str(), "0");
    }

    #[test]
    fn root_has_no_parent() {
        assert!(BlockPath::new("0").parent().is_none());
    }

    #[test]
    fn ancestor_check() {
        let a = BlockPath::new("0.1");
        let b = BlockPath::new("0.1.2");
        let c = BlockPath::new("0.12");
        assert!(a.is_ancestor_of(&b));
        assert!(!a.is_ancestor_of(&c));
        assert!(a.is_ancestor_of(&a));
    }

    #[test]
    fn depth_counts_dots() {
        assert_eq!(BlockPath::new("0").depth(), 0);
        assert_eq!(BlockPath::new("0.1.2").depth(), 2);
    }
}
