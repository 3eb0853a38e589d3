//! Local cache bookkeeping: sidecar metadata and download outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::SnapshotContext;
use crate::errors::Result;

pub const METADATA_SUFFIX: &str = ".meta.json";

/// Sidecar written next to a cached snapshot after each download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub file_name: String,
    /// Archive modification time (Unix seconds) of the copy that was cached.
    pub last_modified: i64,
    pub cached_at: i64,
}

pub fn is_metadata_file(name: &str) -> bool {
    name.ends_with(METADATA_SUFFIX)
}

pub fn metadata_file(context: &SnapshotContext, file_name: &str) -> String {
    context.local_file(&format!("{}{}", file_name, METADATA_SUFFIX))
}

/// Reads the sidecar for `file_name`. Missing or unreadable sidecars yield
/// `None`.
pub async fn read_metadata(context: &SnapshotContext, file_name: &str) -> Result<Option<CacheMetadata>> {
    let path = metadata_file(context, file_name);
    if !context.local.exists(&path).await? {
        return Ok(None);
    }
    let contents = context.local.get(&path).await?;
    match serde_json::from_slice(&contents) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) => {
            tracing::warn!("Ignoring unreadable cache metadata {}: {}", path, e);
            Ok(None)
        }
    }
}

pub async fn write_metadata(
    context: &SnapshotContext,
    file_name: &str,
    archive_last_modified: DateTime<Utc>,
) -> Result<()> {
    let metadata = CacheMetadata {
        file_name: file_name.to_string(),
        last_modified: archive_last_modified.timestamp(),
        cached_at: Utc::now().timestamp(),
    };
    context
        .local
        .put(&metadata_file(context, file_name), serde_json::to_vec(&metadata)?)
        .await
}

pub async fn delete_metadata(context: &SnapshotContext, file_name: &str) -> Result<bool> {
    context.local.delete(&metadata_file(context, file_name)).await
}

/// What `Snapshot::download` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub downloaded: bool,
    pub cache_was_stale: bool,
    pub had_cached_copy: bool,
}

/// Download outcome plus the global smart-cache flag, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheInfo {
    pub downloaded: bool,
    pub cache_was_stale: bool,
    pub had_cached_copy: bool,
    pub smart_cache: bool,
}

impl CacheInfo {
    pub fn new(outcome: DownloadOutcome, smart_cache: bool) -> Self {
        CacheInfo {
            downloaded: outcome.downloaded,
            cache_was_stale: outcome.cache_was_stale,
            had_cached_copy: outcome.had_cached_copy,
            smart_cache,
        }
    }

    pub fn describe(&self) -> &'static str {
        match (self.downloaded, self.cache_was_stale) {
            (false, _) => "Using cached copy",
            (true, true) => "Cached copy was stale, downloaded a fresh copy",
            (true, false) => "Downloaded from archive",
        }
    }
}
