pub mod cache;

use chrono::NaiveDateTime;
use std::sync::OnceLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::{Result, SnapshotError};
use crate::plan::SnapshotPlan;
use crate::utils::{find_executable, format_bytes};
use crate::utils::reporter::Reporter;
use crate::utils::runner::{run_with_credentials, shell_quote};

pub use cache::{CacheInfo, CacheMetadata, DownloadOutcome};

const DOWNLOAD_CHUNK_SIZE: usize = 8192;

/// One archived database dump, owned by exactly one plan.
#[derive(Debug, Clone)]
pub struct Snapshot {
    file_name: String,
    timestamp: NaiveDateTime,
    size: OnceLock<u64>,
}

impl Snapshot {
    pub fn new(file_name: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Snapshot {
            file_name: file_name.into(),
            timestamp,
            size: OnceLock::new(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Archive object size, fetched once and then cached.
    pub async fn size(&self, plan: &SnapshotPlan) -> Result<u64> {
        if let Some(size) = self.size.get() {
            return Ok(*size);
        }
        let context = plan.context();
        let size = context.archive.size(&context.archive_file(&self.file_name)).await?;
        Ok(*self.size.get_or_init(|| size))
    }

    pub async fn formatted_size(&self, plan: &SnapshotPlan) -> Result<String> {
        Ok(format_bytes(self.size(plan).await?))
    }

    pub async fn exists_locally(&self, plan: &SnapshotPlan) -> Result<bool> {
        let context = plan.context();
        context.local.exists(&context.local_file(&self.file_name)).await
    }

    /// True when the local copy should be replaced: it is missing, a newer
    /// snapshot exists in the plan, or the archive object changed since the
    /// copy was cached.
    pub async fn should_refresh_cache(&self, plan: &SnapshotPlan) -> Result<bool> {
        if !self.exists_locally(plan).await? {
            return Ok(true);
        }

        if let Some(newest) = plan.snapshots().first() {
            if newest.timestamp > self.timestamp {
                return Ok(true);
            }
        }

        let context = plan.context();
        if let Some(metadata) = cache::read_metadata(context, &self.file_name).await? {
            let archive_file = context.archive_file(&self.file_name);
            if context.archive.exists(&archive_file).await? {
                let archive_modified = context.archive.last_modified(&archive_file).await?;
                if metadata.last_modified < archive_modified.timestamp() {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Makes sure a local copy exists, downloading it unless a usable cached
    /// copy is present.
    pub async fn download(
        &self,
        plan: &SnapshotPlan,
        use_local_copy: bool,
        progress: Option<&dyn Reporter>,
    ) -> Result<DownloadOutcome> {
        let context = plan.context();
        let local_file = context.local_file(&self.file_name);
        let had_cached_copy = context.local.exists(&local_file).await?;

        if use_local_copy && had_cached_copy {
            tracing::info!("Using local copy of {}", self.file_name);
            return Ok(DownloadOutcome {
                downloaded: false,
                cache_was_stale: false,
                had_cached_copy,
            });
        }

        let mut cache_was_stale = false;
        if context.cache_by_default && had_cached_copy {
            if !self.should_refresh_cache(plan).await? {
                tracing::info!("Cached copy of {} is current", self.file_name);
                return Ok(DownloadOutcome {
                    downloaded: false,
                    cache_was_stale: false,
                    had_cached_copy,
                });
            }
            tracing::info!("Cached copy of {} is stale, removing it", self.file_name);
            context.local.delete(&local_file).await?;
            cache::delete_metadata(context, &self.file_name).await?;
            cache_was_stale = true;
        }

        context.local.make_directory(&context.local_path).await?;
        if let Err(e) = self.copy_from_archive(plan, progress).await {
            context.local.delete(&local_file).await?;
            return Err(e);
        }

        let archive_file = context.archive_file(&self.file_name);
        let archive_modified = context.archive.last_modified(&archive_file).await?;
        cache::write_metadata(context, &self.file_name, archive_modified).await?;

        Ok(DownloadOutcome {
            downloaded: true,
            cache_was_stale,
            had_cached_copy,
        })
    }

    async fn copy_from_archive(&self, plan: &SnapshotPlan, progress: Option<&dyn Reporter>) -> Result<()> {
        let context = plan.context();
        let archive_file = context.archive_file(&self.file_name);
        let local_file = context.local_file(&self.file_name);
        tracing::info!("Downloading {} to {}", archive_file, local_file);

        let Some(reporter) = progress else {
            let contents = context.archive.get(&archive_file).await?;
            return context.local.put(&local_file, contents).await;
        };

        let destination = context.local.local_path(&local_file).ok_or_else(|| {
            SnapshotError::storage(format!("Local store cannot stream into {}", local_file))
        })?;
        let total = self.size(plan).await?;
        let mut reader = context.archive.read_stream(&archive_file).await?;
        let mut writer = tokio::fs::File::create(&destination).await?;
        let mut buffer = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        let mut done = 0u64;

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read]).await?;
            done += read as u64;
            reporter.progress(done, total);
        }
        writer.flush().await?;
        Ok(())
    }

    /// Restores this snapshot into the plan's connection.
    pub async fn load(
        &self,
        plan: &SnapshotPlan,
        use_local_copy: bool,
        keep_local_copy: bool,
        progress: Option<&dyn Reporter>,
    ) -> Result<CacheInfo> {
        let context = plan.context();
        find_executable(&context.utilities.mysql)?;
        let outcome = self.download(plan, use_local_copy, progress).await?;

        let local_file = context.local_file(&self.file_name);
        let source = context.local.local_path(&local_file).ok_or_else(|| {
            SnapshotError::storage(format!("Local store has no filesystem path for {}", local_file))
        })?;
        let command = self.restore_command(plan, &shell_quote(&source.to_string_lossy()));
        let connection = plan.connection_config()?;

        tracing::info!("Loading {} into {}", self.file_name, connection.database);
        run_with_credentials(context.runner.as_ref(), connection, &command).await?;

        if !keep_local_copy {
            self.remove_local_copy(plan).await?;
        }

        Ok(CacheInfo::new(outcome, context.cache_by_default))
    }

    /// Gzipped dumps stream through zcat, plain dumps through cat.
    fn restore_command(&self, plan: &SnapshotPlan, source: &str) -> String {
        let utilities = &plan.context().utilities;
        let reader = if self.file_name.ends_with(".gz") {
            utilities.zcat.as_str()
        } else {
            "cat"
        };
        format!(
            "{} {} | {} --defaults-extra-file={{credentials_file}} {{database}}",
            reader, source, utilities.mysql
        )
    }

    pub async fn remove_local_copy(&self, plan: &SnapshotPlan) -> Result<bool> {
        let context = plan.context();
        let removed = context.local.delete(&context.local_file(&self.file_name)).await?;
        cache::delete_metadata(context, &self.file_name).await?;
        Ok(removed)
    }

    /// Deletes the archive object and any local copy.
    pub async fn remove(&self, plan: &SnapshotPlan) -> Result<bool> {
        let context = plan.context();
        self.remove_local_copy(plan).await?;
        let removed = context.archive.delete(&context.archive_file(&self.file_name)).await?;
        if removed {
            tracing::info!("Removed snapshot {}", self.file_name);
        }
        Ok(removed)
    }
}
