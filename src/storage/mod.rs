//! Byte stores holding snapshot files.
//!
//! Both the archive and the local cache are addressed by `/`-separated
//! relative paths. `local.rs` keeps files on disk, `s3.rs` in an
//! S3-compatible bucket.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

use crate::errors::Result;

pub use local::LocalDiskStore;
pub use s3::S3Store;

pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ByteStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    async fn put(&self, path: &str, contents: Vec<u8>) -> Result<()>;

    /// Stores the contents of a file on the local filesystem under `path`.
    async fn put_file(&self, path: &str, source: &Path) -> Result<()>;

    /// Deletes `path`, returning whether something was removed.
    async fn delete(&self, path: &str) -> Result<bool>;

    async fn size(&self, path: &str) -> Result<u64>;

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>>;

    /// Lists every file below `prefix`, recursively, as full store paths.
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>>;

    async fn read_stream(&self, path: &str) -> Result<ByteReader>;

    async fn make_directory(&self, path: &str) -> Result<()>;

    /// Absolute filesystem path for `path`, for stores backed by a real
    /// filesystem. External processes need one to read or write files.
    fn local_path(&self, path: &str) -> Option<PathBuf>;
}

/// Joins a directory and a file name with exactly one separator.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name.trim_start_matches('/'))
    }
}

/// Strips `dir/` from the front of a listed path, if present.
pub fn relative_to<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return Some(path);
    }
    path.strip_prefix(dir)?.strip_prefix('/')
}
