use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{ByteReader, ByteStore};
use crate::errors::{Result, SnapshotError};

/// A byte store rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalDiskStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn ensure_parent(&self, full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ByteStore for LocalDiskStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.full_path(path)).await?)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        tokio::fs::read(&full_path).await.map_err(|e| {
            SnapshotError::storage(format!("Failed to read {}: {}", full_path.display(), e))
        })
    }

    async fn put(&self, path: &str, contents: Vec<u8>) -> Result<()> {
        let full_path = self.full_path(path);
        self.ensure_parent(&full_path).await?;
        tokio::fs::write(&full_path, contents).await?;
        tracing::debug!("Wrote {}", full_path.display());
        Ok(())
    }

    async fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        let full_path = self.full_path(path);
        if full_path == source {
            return Ok(());
        }
        self.ensure_parent(&full_path).await?;
        tokio::fs::copy(source, &full_path).await.map_err(|e| {
            SnapshotError::storage(format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                full_path.display(),
                e
            ))
        })?;
        tracing::debug!("Copied {} to {}", source.display(), full_path.display());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.full_path(path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        Ok(tokio::fs::metadata(self.full_path(path)).await?.len())
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let modified = tokio::fs::metadata(self.full_path(path)).await?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.full_path(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(true) {
            let entry = entry.map_err(|e| {
                SnapshotError::storage(format!("Failed to list {}: {}", dir.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| SnapshotError::storage(e.to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(key);
        }
        files.sort();
        Ok(files)
    }

    async fn read_stream(&self, path: &str) -> Result<ByteReader> {
        let full_path = self.full_path(path);
        let file = tokio::fs::File::open(&full_path).await.map_err(|e| {
            SnapshotError::storage(format!("Failed to open {}: {}", full_path.display(), e))
        })?;
        Ok(Box::new(file))
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.full_path(path)).await?;
        Ok(())
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.full_path(path))
    }
}
