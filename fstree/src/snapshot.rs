use crate::{NodeKind, Permissions};

/// Owned copy of a subtree, detached from any tree's ids. Children are kept
/// sorted by name so two snapshots of isomorphic trees compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSnapshot {
    pub name: String,
    pub kind: NodeKind,
    pub permissions: Permissions,
    pub data_location: String,
    pub children: Vec<TreeSnapshot>,
}

impl TreeSnapshot {
    pub fn file(name: &str, permissions: Permissions, data_location: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: NodeKind::File,
            permissions,
            data_location: data_location.to_owned(),
            children: Vec::new(),
        }
    }

    pub fn directory(
        name: &str,
        permissions: Permissions,
        data_location: &str,
        mut children: Vec<TreeSnapshot>,
    ) -> Self {
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            name: name.to_owned(),
            kind: NodeKind::Directory,
            permissions,
            data_location: data_location.to_owned(),
            children,
        }
    }

    /// Number of nodes, this one included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeSnapshot::node_count).sum::<usize>()
    }

    pub fn directory_count(&self) -> usize {
        let own = usize::from(self.kind == NodeKind::Directory);
        own + self
            .children
            .iter()
            .map(TreeSnapshot::directory_count)
            .sum::<usize>()
    }

    /// Drops the direct children whose name matches `predicate`.
    pub fn without_children(mut self, predicate: impl Fn(&str) -> bool) -> Self {
        self.children.retain(|child| !predicate(&child.name));
        self
    }
}
