use fstree::{FsError, FsTree, NodeId, join_location};
use protocol::reply::list_line;
use utilities::logger::{instrument, tracing};

use super::CommandRouter;

/// One line per node of the subtree at `start`, the node itself first and
/// every directory's children in name order.
fn render_subtree(tree: &FsTree, start: NodeId, display: &str, out: &mut String) {
    let mut pending = vec![(start, display.to_owned())];
    while let Some((id, path)) = pending.pop() {
        let Some(node) = tree.node(id) else {
            continue;
        };
        out.push_str(&list_line(&path, node.kind));
        let children = tree.children(id);
        for child in children.into_iter().rev() {
            if let Some(child_node) = tree.node(child) {
                pending.push((child, join_location(&path, &child_node.name)));
            }
        }
    }
}

impl CommandRouter {
    #[instrument(name = "router_list", skip(self))]
    pub(super) async fn list(&self, path: Option<&str>) -> Result<String, FsError> {
        let mut out = String::new();
        match path {
            None => {
                for server in self.registry.active_servers().await {
                    let tree = server.tree.read().await;
                    render_subtree(&tree, tree.root(), &server.root_name, &mut out);
                }
            }
            Some(path) => {
                let holders = self.registry.resolve_all_by_path(path).await;
                if holders.is_empty() {
                    return Err(FsError::NotFound);
                }
                let display = match path.trim_end_matches('/') {
                    "" => "/",
                    trimmed => trimmed,
                };
                let mut any_active = false;
                for holder in holders.iter().filter(|holder| holder.server.is_active()) {
                    any_active = true;
                    let tree = holder.server.tree.read().await;
                    if tree.contains(holder.node) {
                        render_subtree(&tree, holder.node, display, &mut out);
                    }
                }
                if !any_active {
                    return Err(FsError::ServerInactive);
                }
            }
        }
        if out.is_empty() {
            return Err(FsError::NoEntries);
        }
        Ok(out)
    }
}
