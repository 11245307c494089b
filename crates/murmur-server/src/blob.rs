//! Filesystem blob store for attachments.
//!
//! Blobs live flat under one directory, named exactly as the attachment
//! inliner generated them. Names are never paths.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use murmur_hub::{BackendError, BlobStore};
use tokio::fs;
use tracing::{debug, instrument};

/// Whether `name` is a plain file name safe to join onto the blob directory.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..")
        && !name.starts_with('.')
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use `root` as the blob directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Blob store ready");
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, BackendError> {
        if !is_valid_name(name) {
            return Err(BackendError::not_found(name));
        }
        Ok(self.root.join(name))
    }

    /// Read a stored blob.
    #[instrument(skip(self))]
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackendError::not_found(name)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), BackendError> {
        let path = self.path_for(name)?;
        fs::write(&path, bytes).await?;
        debug!(blob = %name, size = bytes.len(), "Blob written");
        Ok(())
    }
}
