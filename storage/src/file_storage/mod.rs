mod scan;

use std::path::{Path, PathBuf};

use fstree::{FsError, FsTree};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{self, AsyncWriteExt},
};
use tracing::{info, instrument};

use crate::storage::{Result, Storage};

/// [`Storage`] over a local directory. Every location handed to it must lie
/// below `root`.
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref()).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        info!(root=%root.display(),"Storage root ready");
        Ok(FileStorage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked(&self, location: &str) -> Result<PathBuf> {
        let path = Path::new(location);
        let escapes = path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(FsError::PermissionDenied);
        }
        Ok(path.to_path_buf())
    }
}

impl Storage for FileStorage {
    #[instrument(name = "file_storage_create_file", skip(self))]
    async fn create_file(&self, location: &str) -> Result<()> {
        File::create_new(self.checked(location)?).await?;
        Ok(())
    }

    #[instrument(name = "file_storage_create_dir", skip(self))]
    async fn create_dir(&self, location: &str) -> Result<()> {
        fs::create_dir(self.checked(location)?).await?;
        Ok(())
    }

    #[instrument(name = "file_storage_remove", skip(self))]
    async fn remove(&self, location: &str) -> Result<()> {
        let path = self.checked(location)?;
        if path == self.root {
            return Err(FsError::RootDeletion);
        }
        if fs::metadata(&path).await?.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    #[instrument(name = "file_storage_append", skip(self, data), fields(len = data.len()))]
    async fn append(&self, location: &str, data: &[u8]) -> Result<u64> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.checked(location)?)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(data.len() as u64)
    }

    #[instrument(name = "file_storage_read", skip(self))]
    async fn read(&self, location: &str) -> Result<Box<dyn io::AsyncRead + Unpin + Send>> {
        let file = File::open(self.checked(location)?).await?;
        Ok(Box::new(file))
    }

    async fn size(&self, location: &str) -> Result<u64> {
        Ok(fs::metadata(self.checked(location)?).await?.len())
    }

    #[instrument(name = "file_storage_scan", skip(self))]
    async fn scan(&self) -> Result<FsTree> {
        scan::scan_directory(&self.root).await
    }
}
