use std::collections::HashMap;

use crate::arena::NodeId;
use crate::path::ScenePath;

/// Bidirectional map between structural paths and the nodes occupying them.
///
/// Absence is never an error: a path with no occupant is the signal to
/// synthesize a new node there.
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    by_path: HashMap<ScenePath, NodeId>,
    by_node: HashMap<NodeId, ScenePath>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `node` at `path`, evicting any previous mapping of either side.
    pub fn add(&mut self, node: NodeId, path: ScenePath) {
        if let Some(previous) = self.by_node.remove(&node) {
            self.by_path.remove(&previous);
        }
        if let Some(previous) = self.by_path.remove(&path) {
            self.by_node.remove(&previous);
        }
        self.by_node.insert(node, path.clone());
        self.by_path.insert(path, node);
    }

    pub fn path_of(&self, node: NodeId) -> Option<&ScenePath> {
        self.by_node.get(&node)
    }

    pub fn node_of(&self, path: &ScenePath) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.by_node.contains_key(&node)
    }

    pub fn contains_path(&self, path: &ScenePath) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn remove_by_node(&mut self, node: NodeId) -> Option<ScenePath> {
        let path = self.by_node.remove(&node)?;
        self.by_path.remove(&path);
        Some(path)
    }

    pub fn remove_by_path(&mut self, path: &ScenePath) -> Option<NodeId> {
        let node = self.by_path.remove(path)?;
        self.by_node.remove(&node);
        Some(node)
    }

    /// Puts `replacement` in the slot held by `node`. Returns false when
    /// `node` is not indexed.
    pub fn replace_by_node(&mut self, node: NodeId, replacement: NodeId) -> bool {
        match self.remove_by_node(node) {
            Some(path) => {
                self.add(replacement, path);
                true
            }
            None => false,
        }
    }

    /// Moves the occupant of `from` to `to`. Returns false when `from` is empty.
    pub fn replace_path(&mut self, from: &ScenePath, to: ScenePath) -> bool {
        match self.remove_by_path(from) {
            Some(node) => {
                self.add(node, to);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.by_path.clear();
        self.by_node.clear();
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Entries in depth-first path order.
    pub fn entries(&self) -> Vec<(ScenePath, NodeId)> {
        let mut entries: Vec<_> = self
            .by_path
            .iter()
            .map(|(path, node)| (path.clone(), *node))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn paths(&self) -> Vec<ScenePath> {
        self.entries().into_iter().map(|(path, _)| path).collect()
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.entries().into_iter().map(|(_, node)| node).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> NodeId {
        NodeId {
            index,
            generation: 0,
        }
    }

    fn path(raw: &str) -> ScenePath {
        ScenePath::parse(raw).unwrap()
    }

    #[test]
    fn test_missing_entries_are_not_found() {
        let index = PathIndex::new();
        assert_eq!(index.node_of(&path("0")), None);
        assert_eq!(index.path_of(id(1)), None);
    }

    #[test]
    fn test_iteration_is_depth_first() {
        let mut index = PathIndex::new();
        for (i, p) in ["1", "0", "1.0", "0.2", "0.1"].iter().enumerate() {
            index.add(id(i as u32), path(p));
        }
        let order: Vec<String> = index.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(order, vec!["0", "0.1", "0.2", "1", "1.0"]);
        assert_eq!(index.nodes()[0], id(1));
    }

    #[test]
    fn test_add_evicts_both_sides() {
        let mut index = PathIndex::new();
        index.add(id(1), path("0"));
        index.add(id(1), path("1"));
        assert_eq!(index.node_of(&path("0")), None);
        assert_eq!(index.len(), 1);

        index.add(id(2), path("1"));
        assert_eq!(index.path_of(id(1)), None);
        assert_eq!(index.node_of(&path("1")), Some(id(2)));
    }

    #[test]
    fn test_replace_operations() {
        let mut index = PathIndex::new();
        index.add(id(1), path("0"));
        assert!(index.replace_by_node(id(1), id(7)));
        assert_eq!(index.node_of(&path("0")), Some(id(7)));
        assert!(!index.replace_by_node(id(1), id(8)));

        assert!(index.replace_path(&path("0"), path("2")));
        assert_eq!(index.path_of(id(7)), Some(&path("2")));
        assert!(!index.replace_path(&path("0"), path("3")));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut index = PathIndex::new();
        index.add(id(1), path("0"));
        index.add(id(2), path("1"));
        assert_eq!(index.remove_by_node(id(1)), Some(path("0")));
        assert_eq!(index.remove_by_path(&path("1")), Some(id(2)));
        index.add(id(3), path("0"));
        index.clear();
        assert!(index.is_empty());
    }
}
