use std::{collections::HashMap, fmt};

use uuid::Uuid;

use crate::{FileLock, FsError, Node, NodeId, NodeKind, NodeTable, Permissions, TreeSnapshot};

/// Identity of one tree instance. Two trees built from the same snapshot still
/// get different ids, which is what the naming server's cache keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(Uuid);

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of [`FsTree::copy`]. A write-locked file makes the copy `Busy`,
/// which callers retry later instead of treating it as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied(NodeId),
    Busy,
}

pub fn join_location(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// `"/a/b.txt"` becomes `("/a", "b.txt")`, `"/b.txt"` becomes `("", "b.txt")`.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    if name.is_empty() {
        None
    } else {
        Some((parent, name))
    }
}

/// Arena backed namespace. Directories own a [`NodeTable`] of child ids and
/// every child stores its parent id, so dropping the arena tears the whole
/// tree down.
#[derive(Debug, Clone)]
pub struct FsTree {
    id: TreeId,
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
}

impl FsTree {
    pub fn new(root_name: &str, permissions: Permissions, data_location: &str) -> Self {
        let root = NodeId::from_raw(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node::new(root_name, NodeKind::Directory, permissions, data_location),
        );
        Self {
            id: TreeId(Uuid::new_v4()),
            nodes,
            root,
            next_id: 1,
        }
    }

    /// Builds a tree keeping every data location exactly as in the snapshot.
    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Result<Self, FsError> {
        if snapshot.kind != NodeKind::Directory {
            return Err(FsError::NotADirectory);
        }
        let mut tree = Self::new(&snapshot.name, snapshot.permissions, &snapshot.data_location);
        let root = tree.root;
        for child in &snapshot.children {
            tree.attach(root, child, &child.name, false)?;
        }
        Ok(tree)
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_name(&self) -> &str {
        self.nodes
            .get(&self.root)
            .map(|root| root.name.as_str())
            .unwrap_or_default()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child ids of a directory ordered by name, empty for files.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .and_then(|node| node.children.as_ref())
            .map(|table| table.sorted().into_iter().map(|(_, child)| child).collect())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, parent: NodeId, mut node: Node) -> Result<NodeId, FsError> {
        if node.name.is_empty() || node.name.contains('/') {
            return Err(FsError::Malformed(format!("invalid node name {:?}", node.name)));
        }
        let table = self
            .nodes
            .get_mut(&parent)
            .ok_or(FsError::ParentMissing)?
            .children
            .as_mut()
            .ok_or(FsError::NotADirectory)?;
        let id = NodeId::from_raw(self.next_id);
        table.insert(&node.name, id)?;
        self.next_id += 1;
        node.parent = Some(parent);
        node.children = match node.kind {
            NodeKind::Directory => Some(NodeTable::new()),
            NodeKind::File => None,
        };
        node.lock = FileLock::Unlocked;
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn find(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.nodes.get(&dir)?.children.as_ref()?.find(name)
    }

    /// Walks a slash separated path from the root. A leading component equal
    /// to the root's own name is skipped, so `/home/a` and `/a` are the same
    /// node on a tree rooted at `home`.
    pub fn resolve_path(&self, path: &str) -> Option<NodeId> {
        let root_name = self.root_name();
        let mut components = path
            .split('/')
            .filter(|component| !component.is_empty() && *component != ".")
            .peekable();
        if components.peek().copied() == Some(root_name) {
            components.next();
        }
        let mut current = self.root;
        for component in components {
            current = self.find(current, component)?;
        }
        Some(current)
    }

    /// Path of a node relative to the root, `/` for the root itself.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.as_str());
            current = self.nodes.get(&parent)?;
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    pub fn create_empty(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId, FsError> {
        let parent_node = self.nodes.get(&parent).ok_or(FsError::ParentMissing)?;
        if !parent_node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let location = join_location(&parent_node.data_location, name);
        self.insert(parent, Node::new(name, kind, Permissions::created(), &location))
    }

    /// Fails the way [`FsTree::delete`] would, without changing anything.
    pub fn ensure_deletable(&self, id: NodeId) -> Result<(), FsError> {
        if id == self.root {
            return Err(FsError::RootDeletion);
        }
        if !self.nodes.contains_key(&id) {
            return Err(FsError::NotFound);
        }
        for member in self.post_order(id) {
            match self.nodes.get(&member).map(|node| node.lock) {
                Some(FileLock::WriteHeld) => return Err(FsError::busy_writing()),
                Some(FileLock::ReadHeld(_)) => return Err(FsError::busy_reading()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Removes a node and its whole subtree. The removed nodes are returned
    /// leaves first, every child before its parent.
    pub fn delete(&mut self, id: NodeId) -> Result<Vec<Node>, FsError> {
        self.ensure_deletable(id)?;
        let node = self.nodes.get(&id).ok_or(FsError::NotFound)?;
        let (parent, name) = (node.parent, node.name.clone());
        let order = self.post_order(id);
        if let Some(table) = parent
            .and_then(|parent| self.nodes.get_mut(&parent))
            .and_then(|parent| parent.children.as_mut())
        {
            table.remove(&name);
        }
        Ok(order
            .into_iter()
            .filter_map(|member| self.nodes.remove(&member))
            .collect())
    }

    fn post_order(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            stack.extend(self.children(id).into_iter().map(|child| (child, false)));
        }
        order
    }

    /// True when a file in the subtree under `id` is being written.
    pub fn has_writer(&self, id: NodeId) -> bool {
        self.post_order(id).iter().any(|member| {
            self.nodes
                .get(member)
                .is_some_and(|node| node.lock == FileLock::WriteHeld)
        })
    }

    /// Read locks every file under `id`, all or none, and returns them.
    pub fn lock_subtree_read(&mut self, id: NodeId) -> Result<Vec<NodeId>, FsError> {
        if !self.nodes.contains_key(&id) {
            return Err(FsError::NotFound);
        }
        if self.has_writer(id) {
            return Err(FsError::busy_writing());
        }
        let files: Vec<NodeId> = self
            .post_order(id)
            .into_iter()
            .filter(|member| self.nodes.get(member).is_some_and(|node| !node.is_dir()))
            .collect();
        for (taken, file) in files.iter().enumerate() {
            if let Err(e) = self.try_lock_read(*file) {
                for held in &files[..taken] {
                    self.unlock_read(*held);
                }
                return Err(e);
            }
        }
        Ok(files)
    }

    /// Detached copy of the subtree under `id`, lock state is not part of it.
    pub fn snapshot(&self, id: NodeId) -> Result<TreeSnapshot, FsError> {
        let node = self.nodes.get(&id).ok_or(FsError::NotFound)?;
        match &node.children {
            None => Ok(TreeSnapshot::file(&node.name, node.permissions, &node.data_location)),
            Some(table) => {
                let children = table
                    .sorted()
                    .into_iter()
                    .map(|(_, child)| self.snapshot(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TreeSnapshot::directory(
                    &node.name,
                    node.permissions,
                    &node.data_location,
                    children,
                ))
            }
        }
    }

    /// Inserts `snapshot` under `parent` as `name`, rewriting every data
    /// location to live below the parent's location.
    pub fn graft(&mut self, parent: NodeId, snapshot: &TreeSnapshot, name: &str) -> Result<NodeId, FsError> {
        let parent_node = self.nodes.get(&parent).ok_or(FsError::ParentMissing)?;
        if !parent_node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if self.find(parent, name).is_some() {
            return Err(FsError::AlreadyExists(name.to_owned()));
        }
        self.attach(parent, snapshot, name, true)
    }

    fn attach(&mut self, parent: NodeId, snapshot: &TreeSnapshot, name: &str, rebase: bool) -> Result<NodeId, FsError> {
        let top = self.attach_one(parent, snapshot, name, rebase)?;
        let mut pending: Vec<(NodeId, &TreeSnapshot)> =
            snapshot.children.iter().map(|child| (top, child)).collect();
        while let Some((parent, child)) = pending.pop() {
            let id = self.attach_one(parent, child, &child.name, rebase)?;
            pending.extend(child.children.iter().map(|grandchild| (id, grandchild)));
        }
        Ok(top)
    }

    fn attach_one(&mut self, parent: NodeId, snapshot: &TreeSnapshot, name: &str, rebase: bool) -> Result<NodeId, FsError> {
        let location = if rebase {
            let parent_node = self.nodes.get(&parent).ok_or(FsError::ParentMissing)?;
            join_location(&parent_node.data_location, name)
        } else {
            snapshot.data_location.clone()
        };
        self.insert(
            parent,
            Node::new(name, snapshot.kind, snapshot.permissions, &location),
        )
    }

    /// Clones the subtree at `source` into `dest_dir` under `new_name`.
    pub fn copy(&mut self, source: NodeId, dest_dir: NodeId, new_name: &str) -> Result<CopyOutcome, FsError> {
        let dest = self.nodes.get(&dest_dir).ok_or(FsError::NotFound)?;
        if !dest.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if self.has_writer(source) {
            return Ok(CopyOutcome::Busy);
        }
        let snapshot = self.snapshot(source)?;
        self.graft(dest_dir, &snapshot, new_name)
            .map(CopyOutcome::Copied)
    }

    fn file_lock_mut(&mut self, id: NodeId) -> Result<&mut FileLock, FsError> {
        let node = self.nodes.get_mut(&id).ok_or(FsError::NotFound)?;
        if node.is_dir() {
            return Err(FsError::NotAFile);
        }
        Ok(&mut node.lock)
    }

    pub fn try_lock_read(&mut self, id: NodeId) -> Result<(), FsError> {
        self.file_lock_mut(id)?.try_acquire_read()
    }

    pub fn try_lock_write(&mut self, id: NodeId) -> Result<(), FsError> {
        self.file_lock_mut(id)?.try_acquire_write()
    }

    /// Releasing a lock of a node deleted meanwhile is a no-op.
    pub fn unlock_read(&mut self, id: NodeId) {
        if let Ok(lock) = self.file_lock_mut(id) {
            lock.release_read();
        }
    }

    pub fn unlock_write(&mut self, id: NodeId) {
        if let Ok(lock) = self.file_lock_mut(id) {
            lock.release_write();
        }
    }
}
