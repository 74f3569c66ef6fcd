use fstree::{FsError, FsTree};
use tokio::io;

pub type Result<T> = std::result::Result<T, FsError>;

/// Physical primitives of a storage server. Locations are the absolute
/// `data_location` strings carried by tree nodes.
pub trait Storage {
    async fn create_file(&self, location: &str) -> Result<()>;
    async fn create_dir(&self, location: &str) -> Result<()>;
    /// Removes a file, or a directory with everything below it.
    async fn remove(&self, location: &str) -> Result<()>;
    async fn append(&self, location: &str, data: &[u8]) -> Result<u64>;
    async fn read(&self, location: &str) -> Result<Box<dyn io::AsyncRead + Unpin + Send>>;
    async fn size(&self, location: &str) -> Result<u64>;
    /// Builds the tree of everything currently stored, hidden entries skipped.
    async fn scan(&self) -> Result<FsTree>;
}

#[cfg(test)]
pub mod tests {
    use fstree::{join_location, NodeKind};
    use tokio::io::{AsyncReadExt, BufReader};

    use super::*;
    pub async fn storage_test(storage: impl Storage, root: &str) -> Result<()> {
        let dir = join_location(root, "docs");
        let file = join_location(&dir, "hello.txt");
        storage.create_dir(&dir).await?;
        storage.create_file(&file).await?;

        let written = storage.append(&file, b"hello ").await?;
        assert_eq!(written, 6);
        storage.append(&file, b"world").await?;
        assert_eq!(storage.size(&file).await?, 11);

        let reader = storage.read(&file).await?;
        let mut buf_reader = BufReader::new(reader);
        let mut read_buf = Vec::new();
        buf_reader.read_to_end(&mut read_buf).await?;
        assert_eq!(read_buf, b"hello world");

        let tree = storage.scan().await?;
        let id = tree.resolve_path("/docs/hello.txt").expect("scanned file");
        assert_eq!(tree.node(id).map(|node| node.kind), Some(NodeKind::File));

        storage.remove(&dir).await?;
        let tree = storage.scan().await?;
        assert!(tree.resolve_path("/docs").is_none());
        Ok(())
    }
}
