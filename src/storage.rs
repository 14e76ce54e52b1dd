use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Durable home for uploaded attachment blobs. Implementations must not
/// return from `put_file` until the contents are fully written; database
/// rows referencing a stored name are only inserted afterwards.
#[async_trait]
pub trait AttachmentStorage: Send + Sync + 'static {
    async fn put_file(&self, stored_name: &str, bytes: Vec<u8>) -> Result<()>;

    async fn delete_file(&self, stored_name: &str) -> Result<()>;

    /// Public URL path the stored name is served back under.
    fn public_path(&self, stored_name: &str) -> String;
}

/// Local-disk store rooted under `<upload_dir>/tickets`, served by the
/// static file route mounted at `/uploads`.
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Result<Self> {
        let root = upload_dir.into().join("tickets");
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create upload directory {}", root.display()))?;
        Ok(Self { root })
    }
}

#[async_trait]
impl AttachmentStorage for LocalDiskStorage {
    async fn put_file(&self, stored_name: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.root.join(stored_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write upload {}", path.display()))?;
        Ok(())
    }

    async fn delete_file(&self, stored_name: &str) -> Result<()> {
        let path = self.root.join(stored_name);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete upload {}", path.display()))?;
        Ok(())
    }

    fn public_path(&self, stored_name: &str) -> String {
        format!("/uploads/tickets/{stored_name}")
    }
}
