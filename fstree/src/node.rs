use std::{fmt, str::FromStr};

use crate::{FileLock, FsError, NodeTable, Permissions};

/// Handle of a node inside one [`crate::FsTree`]. Ids are never reused, so a
/// stale handle can only miss, never alias a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn from_raw(raw: u64) -> Self {
        NodeId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn wire_code(&self) -> i32 {
        match self {
            NodeKind::File => 0,
            NodeKind::Directory => 1,
        }
    }

    pub fn from_wire(code: i32) -> Option<Self> {
        match code {
            0 => Some(NodeKind::File),
            1 => Some(NodeKind::Directory),
            _ => None,
        }
    }

    /// Keyword used by the CREATE command.
    pub fn keyword(&self) -> &'static str {
        match self {
            NodeKind::File => "FILE",
            NodeKind::Directory => "DIR",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => f.write_str("File"),
            NodeKind::Directory => f.write_str("Directory"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FILE" => Ok(NodeKind::File),
            "DIR" | "DIRECTORY" => Ok(NodeKind::Directory),
            other => Err(FsError::Malformed(format!("unknown node type {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub permissions: Permissions,
    /// Absolute path of the node on the owning storage server's disk.
    pub data_location: String,
    pub lock: FileLock,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Option<NodeTable>,
}

impl Node {
    pub fn new(name: &str, kind: NodeKind, permissions: Permissions, data_location: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            permissions,
            data_location: data_location.to_owned(),
            lock: FileLock::default(),
            parent: None,
            children: match kind {
                NodeKind::Directory => Some(NodeTable::new()),
                NodeKind::File => None,
            },
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Option<&NodeTable> {
        self.children.as_ref()
    }
}
