use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, ArchiveDisk, ConnectionConfig, Utilities};
use crate::errors::{Result, SnapshotError};
use crate::storage::{ByteStore, LocalDiskStore, S3Store, join_path};
use crate::utils::runner::{CommandRunner, ShellRunner};
use crate::utils::statements::{MySqlExecutor, StatementExecutor};

/// Everything plans and snapshots share: the two stores, the runtime
/// environment name and the external collaborators.
pub struct SnapshotContext {
    pub archive: Arc<dyn ByteStore>,
    pub archive_path: String,
    pub local: Arc<dyn ByteStore>,
    pub local_path: String,
    /// Global smart-cache flag.
    pub cache_by_default: bool,
    pub environment: String,
    pub utilities: Utilities,
    pub connections: HashMap<String, ConnectionConfig>,
    pub default_connection: Option<String>,
    /// Statements run after every snapshot load, before plan statements.
    pub post_load_sqls: Vec<String>,
    pub runner: Arc<dyn CommandRunner>,
    pub executor: Arc<dyn StatementExecutor>,
}

impl SnapshotContext {
    /// Wires up the configured stores, `sh`-based runner and MySQL executor.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let filesystem = &config.filesystem;

        let archive: Arc<dyn ByteStore> = match filesystem.archive_disk {
            ArchiveDisk::Local => {
                let root = filesystem.archive_root.clone().ok_or_else(|| {
                    SnapshotError::config("filesystem.archive_root is required for a local archive")
                })?;
                Arc::new(LocalDiskStore::new(root))
            }
            ArchiveDisk::S3 => {
                let spaces_config = config.spaces_config.as_ref().ok_or_else(|| {
                    SnapshotError::config("s3_storage must be configured for an s3 archive")
                })?;
                Arc::new(S3Store::connect(spaces_config).await)
            }
        };

        Ok(SnapshotContext {
            archive,
            archive_path: filesystem.archive_path.trim_end_matches('/').to_string(),
            local: Arc::new(LocalDiskStore::new(filesystem.local_root.clone())),
            local_path: filesystem.local_path.trim_end_matches('/').to_string(),
            cache_by_default: filesystem.cache_by_default,
            environment: config.environment.clone(),
            utilities: config.utilities.clone(),
            connections: config.connections.clone(),
            default_connection: config.default_connection.clone(),
            post_load_sqls: config.post_load_sqls.clone(),
            runner: Arc::new(ShellRunner),
            executor: Arc::new(MySqlExecutor::new(config.connections.clone())),
        })
    }

    pub fn archive_file(&self, file_name: &str) -> String {
        join_path(&self.archive_path, file_name)
    }

    pub fn local_file(&self, file_name: &str) -> String {
        join_path(&self.local_path, file_name)
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections.get(name).ok_or_else(|| {
            SnapshotError::config(format!("A database connection for name {} does not exist", name))
        })
    }
}
