//! Transfer of a whole subtree with one acknowledgment per field.
//!
//! Every node is sent as eight fields: marker, name length, name, kind,
//! permission bits, location length, location and the has-children flag. A
//! directory is followed by its children split into [`TABLE_SIZE`] bucket
//! chains, and every chain (the top level one included) is closed by
//! [`END_MARKER`]. The receiver answers every field with [`ACK`] before the
//! sender may continue, so a transfer costs exactly
//! `8 * nodes + 1 + TABLE_SIZE * directories` round trips.

use fstree::{FsError, NodeKind, Permissions, TABLE_SIZE, TreeSnapshot, wire_bucket};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use utilities::logger::trace;

pub const NODE_MARKER: i32 = 1;
pub const END_MARKER: i32 = -1;
pub const ACK: &[u8; 2] = b"OK";
pub const MAX_STRING_LEN: i32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub nodes: usize,
    pub round_trips: usize,
}

impl TransferStats {
    pub fn expected_round_trips(nodes: usize, directories: usize) -> usize {
        8 * nodes + 1 + TABLE_SIZE * directories
    }
}

enum WireField<'a> {
    Int(i32),
    Text(&'a str),
}

fn encode_chain<'a>(chain: &[&'a TreeSnapshot], out: &mut Vec<WireField<'a>>) {
    for &node in chain {
        out.push(WireField::Int(NODE_MARKER));
        out.push(WireField::Int(node.name.len() as i32));
        out.push(WireField::Text(&node.name));
        out.push(WireField::Int(node.kind.wire_code()));
        out.push(WireField::Int(node.permissions.bits() as i32));
        out.push(WireField::Int(node.data_location.len() as i32));
        out.push(WireField::Text(&node.data_location));
        match node.kind {
            NodeKind::Directory => {
                out.push(WireField::Int(1));
                let mut buckets: Vec<Vec<&TreeSnapshot>> = vec![Vec::new(); TABLE_SIZE];
                for child in &node.children {
                    buckets[wire_bucket(&child.name)].push(child);
                }
                for bucket in &buckets {
                    encode_chain(bucket, out);
                }
            }
            NodeKind::File => out.push(WireField::Int(0)),
        }
    }
    out.push(WireField::Int(END_MARKER));
}

fn desync(context: &str, e: std::io::Error) -> FsError {
    FsError::ProtocolDesync(format!("{context}: {e}"))
}

/// Sends `snapshot` as a single-node top level chain.
pub async fn send_snapshot<S>(stream: &mut S, snapshot: &TreeSnapshot) -> Result<TransferStats, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut fields = Vec::new();
    encode_chain(&[snapshot], &mut fields);
    for field in &fields {
        if let WireField::Text(text) = field {
            if text.len() > MAX_STRING_LEN as usize {
                return Err(FsError::Malformed(format!("field too long: {text}")));
            }
        }
    }
    let mut ack = [0u8; 2];
    for field in &fields {
        let written = match field {
            WireField::Int(value) => stream.write_all(&value.to_le_bytes()).await,
            WireField::Text(text) => stream.write_all(text.as_bytes()).await,
        };
        written.map_err(|e| desync("write field", e))?;
        stream.flush().await.map_err(|e| desync("flush field", e))?;
        stream
            .read_exact(&mut ack)
            .await
            .map_err(|e| desync("read ack", e))?;
        if &ack != ACK {
            return Err(FsError::ProtocolDesync(format!("unexpected ack {ack:?}")));
        }
    }
    let stats = TransferStats {
        nodes: snapshot.node_count(),
        round_trips: fields.len(),
    };
    trace!(nodes = stats.nodes, round_trips = stats.round_trips, "Node chain sent");
    Ok(stats)
}

struct ChainReader<'a, S> {
    stream: &'a mut S,
    round_trips: usize,
}

impl<S> ChainReader<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn ack(&mut self) -> Result<(), FsError> {
        self.stream
            .write_all(ACK)
            .await
            .map_err(|e| desync("write ack", e))?;
        self.stream.flush().await.map_err(|e| desync("flush ack", e))?;
        self.round_trips += 1;
        Ok(())
    }

    async fn read_i32(&mut self) -> Result<i32, FsError> {
        let value = self
            .stream
            .read_i32_le()
            .await
            .map_err(|e| desync("read int", e))?;
        self.ack().await?;
        Ok(value)
    }

    async fn read_text(&mut self, len: i32) -> Result<String, FsError> {
        if !(0..=MAX_STRING_LEN).contains(&len) {
            return Err(FsError::ProtocolDesync(format!("invalid string length {len}")));
        }
        let mut raw = vec![0u8; len as usize];
        self.stream
            .read_exact(&mut raw)
            .await
            .map_err(|e| desync("read string", e))?;
        self.ack().await?;
        String::from_utf8(raw).map_err(|e| FsError::ProtocolDesync(e.to_string()))
    }

    async fn read_node(&mut self) -> Result<(TreeSnapshot, bool), FsError> {
        let name_len = self.read_i32().await?;
        let name = self.read_text(name_len).await?;
        let kind_code = self.read_i32().await?;
        let kind = NodeKind::from_wire(kind_code)
            .ok_or_else(|| FsError::ProtocolDesync(format!("invalid node kind {kind_code}")))?;
        let permissions = Permissions::from_bits_truncate(self.read_i32().await? as u32);
        let location_len = self.read_i32().await?;
        let data_location = self.read_text(location_len).await?;
        let has_children = self.read_i32().await? != 0;
        if has_children && kind != NodeKind::Directory {
            return Err(FsError::ProtocolDesync(format!("file {name} announced children")));
        }
        let node = TreeSnapshot {
            name,
            kind,
            permissions,
            data_location,
            children: Vec::new(),
        };
        Ok((node, has_children))
    }
}

struct OpenDirectory {
    node: TreeSnapshot,
    chains_left: usize,
}

fn adopt(stack: &mut [OpenDirectory], top_level: &mut Vec<TreeSnapshot>, node: TreeSnapshot) -> Result<(), FsError> {
    let siblings = match stack.last_mut() {
        Some(parent) => &mut parent.node.children,
        None => top_level,
    };
    if siblings.iter().any(|sibling| sibling.name == node.name) {
        return Err(FsError::ProtocolDesync(format!("duplicate sibling {}", node.name)));
    }
    siblings.push(node);
    Ok(())
}

/// Receives one subtree sent by [`send_snapshot`]. Any short read, bad field
/// or second top level node fails the whole transfer and nothing partial is
/// returned.
pub async fn receive_snapshot<S>(stream: &mut S) -> Result<(TreeSnapshot, TransferStats), FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = ChainReader {
        stream,
        round_trips: 0,
    };
    let mut stack: Vec<OpenDirectory> = Vec::new();
    let mut top_level = Vec::new();
    loop {
        let marker = reader.read_i32().await?;
        if marker == END_MARKER {
            let Some(open) = stack.last_mut() else {
                break;
            };
            open.chains_left -= 1;
            if open.chains_left == 0 {
                if let Some(mut done) = stack.pop() {
                    done.node.children.sort_by(|a, b| a.name.cmp(&b.name));
                    adopt(&mut stack, &mut top_level, done.node)?;
                }
            }
            continue;
        }
        if marker != NODE_MARKER {
            return Err(FsError::ProtocolDesync(format!("invalid marker {marker}")));
        }
        let (node, has_children) = reader.read_node().await?;
        if has_children {
            stack.push(OpenDirectory {
                node,
                chains_left: TABLE_SIZE,
            });
        } else {
            adopt(&mut stack, &mut top_level, node)?;
        }
    }
    let round_trips = reader.round_trips;
    if top_level.len() != 1 {
        return Err(FsError::ProtocolDesync(format!(
            "expected a single root, got {}",
            top_level.len()
        )));
    }
    let Some(root) = top_level.pop() else {
        return Err(FsError::ProtocolDesync("empty transfer".to_string()));
    };
    let stats = TransferStats {
        nodes: root.node_count(),
        round_trips,
    };
    trace!(nodes = stats.nodes, round_trips = stats.round_trips, "Node chain received");
    Ok((root, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstree::{FsTree, Permissions};
    use tokio::io::duplex;

    fn nested_tree() -> FsTree {
        let mut tree = FsTree::new("home", Permissions::all(), "/srv/home");
        let mut parent = tree.root();
        for depth in 0..6 {
            parent = tree
                .create_empty(parent, &format!("level{depth}"), NodeKind::Directory)
                .unwrap();
            tree.create_empty(parent, &format!("file{depth}.txt"), NodeKind::File)
                .unwrap();
        }
        let root = tree.root();
        for name in ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k"] {
            tree.create_empty(root, name, NodeKind::File).unwrap();
        }
        tree
    }

    async fn round_trip(snapshot: &TreeSnapshot) -> (TreeSnapshot, TransferStats, TransferStats) {
        let (mut sender, mut receiver) = duplex(64);
        let send = async { send_snapshot(&mut sender, snapshot).await.unwrap() };
        let receive = async { receive_snapshot(&mut receiver).await.unwrap() };
        let (sent, (received, received_stats)) = tokio::join!(send, receive);
        (received, sent, received_stats)
    }

    #[tokio::test]
    async fn single_node_round_trip() {
        let tree = FsTree::new("solo", Permissions::READ, "/data/solo");
        let snapshot = tree.snapshot(tree.root()).unwrap();
        let (received, sent, _) = round_trip(&snapshot).await;
        assert_eq!(received, snapshot);
        // one node, one directory with ten empty chains, one top level end marker
        assert_eq!(sent.round_trips, 8 + 1 + 10);
    }

    #[tokio::test]
    async fn nested_tree_round_trip_is_isomorphic() {
        let tree = nested_tree();
        let snapshot = tree.snapshot(tree.root()).unwrap();
        let (received, sent, received_stats) = round_trip(&snapshot).await;
        assert_eq!(received, snapshot);
        let rebuilt = FsTree::from_snapshot(&received).unwrap();
        assert!(rebuilt.resolve_path("/level0/level1/level2/level3/level4/level5/file5.txt").is_some());
        assert_eq!(sent.nodes, tree.len());
        assert_eq!(sent, received_stats);
    }

    #[tokio::test]
    async fn round_trips_grow_with_tree_size() {
        let tree = nested_tree();
        let snapshot = tree.snapshot(tree.root()).unwrap();
        let (_, sent, _) = round_trip(&snapshot).await;
        let expected = TransferStats::expected_round_trips(
            snapshot.node_count(),
            snapshot.directory_count(),
        );
        assert_eq!(sent.round_trips, expected);
        // 24 nodes, 7 directories
        assert_eq!(expected, 8 * 24 + 1 + 10 * 7);
    }

    #[tokio::test]
    async fn truncated_transfer_fails() {
        let (mut sender, mut receiver) = duplex(1024);
        let receive = tokio::spawn(async move { receive_snapshot(&mut receiver).await });
        // marker and a name length, then the peer goes away
        sender.write_all(&NODE_MARKER.to_le_bytes()).await.unwrap();
        let mut ack = [0u8; 2];
        sender.read_exact(&mut ack).await.unwrap();
        sender.write_all(&4i32.to_le_bytes()).await.unwrap();
        sender.read_exact(&mut ack).await.unwrap();
        sender.write_all(b"ho").await.unwrap();
        drop(sender);
        let result = receive.await.unwrap();
        assert!(matches!(result, Err(FsError::ProtocolDesync(_))));
    }

    #[tokio::test]
    async fn bad_ack_aborts_sender() {
        let tree = FsTree::new("solo", Permissions::READ, "/data/solo");
        let snapshot = tree.snapshot(tree.root()).unwrap();
        let (mut sender, mut receiver) = duplex(1024);
        let peer = tokio::spawn(async move {
            let mut marker = [0u8; 4];
            receiver.read_exact(&mut marker).await.unwrap();
            receiver.write_all(b"NO").await.unwrap();
            receiver
        });
        let result = send_snapshot(&mut sender, &snapshot).await;
        assert!(matches!(result, Err(FsError::ProtocolDesync(_))));
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn invalid_marker_is_rejected() {
        let (mut sender, mut receiver) = duplex(1024);
        let receive = tokio::spawn(async move { receive_snapshot(&mut receiver).await });
        sender.write_all(&7i32.to_le_bytes()).await.unwrap();
        let mut ack = [0u8; 2];
        sender.read_exact(&mut ack).await.unwrap();
        let result = receive.await.unwrap();
        assert!(matches!(result, Err(FsError::ProtocolDesync(_))));
    }
}
