//! In-memory namespace shared by the storage servers (their local tree) and
//! the naming server (one shadow tree per registered storage server).

mod error;
mod lock;
mod node;
mod node_table;
mod permissions;
mod snapshot;
mod tree;

pub use error::FsError;
pub use lock::FileLock;
pub use node::{Node, NodeId, NodeKind};
pub use node_table::{NodeTable, TABLE_SIZE, wire_bucket};
pub use permissions::Permissions;
pub use snapshot::TreeSnapshot;
pub use tree::{CopyOutcome, FsTree, TreeId, join_location, split_parent};
