use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::{error, info};
use uuid::Uuid;

use crate::error_handling::types::StorageError;

/// Blob storage addressable by opaque locator.
///
/// Callers never learn whether a locator is a filesystem path or an
/// object-store key; they hand bytes in and get a locator back.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store thumbnail bytes for an event. Returns the locator.
    async fn put(
        &self,
        session_id: Uuid,
        event_id: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError>;

    /// Read bytes back by locator.
    async fn get(&self, locator: &str) -> Result<Vec<u8>, StorageError>;
}

/// Filesystem-backed blob store used in local deployments.
///
/// Locators look like `{session_id}/thumb-{event_id}.jpg` relative to the
/// base path.
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            error!("failed to create blob dir {}: {}", base_path.display(), e);
            StorageError::WriteFailed
        })?;
        info!("blob store initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(locator);
        // A locator is data from the database, not a path the caller may
        // point anywhere; refuse anything that could escape the base.
        let sane = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !sane {
            error!("refusing traversal in blob locator {:?}", locator);
            return Err(StorageError::ReadFailed);
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        session_id: Uuid,
        event_id: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        // Client event ids end up in the locator; keep them filename-safe.
        let safe_event: String = event_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let locator = format!("{}/thumb-{}.jpg", session_id, safe_event);
        let path = self.resolve(&locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                error!("failed to create blob parent {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            error!("failed to write blob {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(locator)?;
        tokio::fs::read(&path).await.map_err(|e| {
            error!("failed to read blob {}: {}", path.display(), e);
            StorageError::ReadFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let session_id = Uuid::new_v4();

        let locator = store.put(session_id, "e1", b"jpegbytes").await.unwrap();
        assert_eq!(locator, format!("{}/thumb-e1.jpg", session_id));
        assert_eq!(store.get(&locator).await.unwrap(), b"jpegbytes");
    }

    #[tokio::test]
    async fn hostile_event_id_is_sanitized() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let locator = store
            .put(Uuid::new_v4(), "../../etc/passwd", b"x")
            .await
            .unwrap();
        assert!(!locator.contains(".."));
        assert_eq!(store.get(&locator).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn traversal_locator_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.get("../outside.jpg").await.is_err());
    }

    #[tokio::test]
    async fn missing_blob_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.get("nope/thumb-x.jpg").await.is_err());
    }
}
