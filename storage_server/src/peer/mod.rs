//! Storage to storage COPY. The source side streams a subtree into the
//! destination's client listener, which creates and fills each node.

pub mod receiver;
pub mod sender;
