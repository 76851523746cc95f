//! Filesystem-backed artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gleaner_core::config::StorageConfig;
use gleaner_scheduler::{ArtifactStore, StorageError, StoredArtifact};
use tracing::debug;
use uuid::Uuid;

/// Writes each artifact to its own file under `root`.
pub struct FsArtifactStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root, config.public_base_url.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, path: &Path, name: &str) -> String {
        match self.public_base_url {
            Some(ref base) => format!("{base}/{name}"),
            None => format!("file://{}", path.display()),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        suggested_name: Option<&str>,
    ) -> Result<StoredArtifact, StorageError> {
        let name = match suggested_name {
            Some(suggested) => format!("{}-{}", Uuid::new_v4(), check_name(suggested)?),
            None => format!("{}.json", Uuid::new_v4()),
        };

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(&name);
        tokio::fs::write(&path, &bytes).await?;
        let path = tokio::fs::canonicalize(&path)
            .await
            .unwrap_or_else(|_| path.clone());

        debug!(name = %name, bytes = bytes.len(), "artifact written");
        Ok(StoredArtifact {
            url: self.url_for(&path, &name),
            name,
        })
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.root.join(check_name(name)?);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Names must stay inside `root`.
fn check_name(name: &str) -> Result<&str, StorageError> {
    let name = name.trim();
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains("..")
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_unique_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts"), None);

        let a = store.put(b"[1]".to_vec(), Some("faq.json")).await.unwrap();
        let b = store.put(b"[2]".to_vec(), Some("faq.json")).await.unwrap();

        assert_ne!(a.name, b.name);
        assert!(a.name.ends_with("-faq.json"));
        assert!(a.url.starts_with("file://"));
        let written = std::fs::read(store.root().join(&a.name)).unwrap();
        assert_eq!(written, b"[1]");
    }

    #[tokio::test]
    async fn put_without_name_uses_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path(), None);

        let stored = store.put(Vec::new(), None).await.unwrap();

        assert!(stored.name.ends_with(".json"));
        assert!(Uuid::parse_str(stored.name.trim_end_matches(".json")).is_ok());
    }

    #[tokio::test]
    async fn public_base_url_is_used_for_links() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path(), Some("https://cdn.example.com/faq/".into()));

        let stored = store.put(b"{}".to_vec(), Some("x.json")).await.unwrap();

        assert_eq!(
            stored.url,
            format!("https://cdn.example.com/faq/{}", stored.name)
        );
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path(), None);

        for bad in ["../escape.json", "a/b.json", ".hidden", "  "] {
            let err = store.put(Vec::new(), Some(bad)).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidName(_)), "{bad}");
        }
        assert!(store.delete("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path(), None);
        let stored = store.put(b"{}".to_vec(), Some("x.json")).await.unwrap();

        assert!(store.delete(&stored.name).await.unwrap());
        assert!(!store.delete(&stored.name).await.unwrap());
    }
}
