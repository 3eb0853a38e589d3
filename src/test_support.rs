//! Fixtures shared by the unit tests: temporary stores, stand-in shell
//! utilities and a recording statement executor.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::config::{ConnectionConfig, EnvironmentLocks, PlanConfig, Utilities};
use crate::context::SnapshotContext;
use crate::errors::{Result, SnapshotError};
use crate::plan::SnapshotPlan;
use crate::storage::{ByteStore, LocalDiskStore};
use crate::utils::runner::ShellRunner;
use crate::utils::statements::StatementExecutor;

pub(crate) const TEST_ENVIRONMENT: &str = "testing";

/// A plan config matching `template` that may create and load anywhere.
pub(crate) fn plan_config(template: &str) -> PlanConfig {
    PlanConfig {
        file_template: Some(template.to_string()),
        keep_last: 1,
        environment_locks: EnvironmentLocks {
            create: "*".to_string(),
            load: "*".to_string(),
        },
        ..PlanConfig::default()
    }
}

fn connection(database: &str) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        read_host: None,
        port: 3306,
        username: "app".to_string(),
        password: "secret".to_string(),
        database: database.to_string(),
    }
}

/// Records statements; any statement starting with `FAIL` errors.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    executed: Mutex<Vec<(String, String)>>,
    dropped: Mutex<Vec<String>>,
}

#[async_trait]
impl StatementExecutor for RecordingExecutor {
    async fn execute(&self, connection: &str, statement: &str) -> Result<()> {
        if statement.starts_with("FAIL") {
            return Err(SnapshotError::Statement(format!("rejected: {}", statement)));
        }
        self.executed
            .lock()
            .unwrap()
            .push((connection.to_string(), statement.to_string()));
        Ok(())
    }

    async fn drop_all_tables(&self, connection: &str) -> Result<()> {
        self.dropped.lock().unwrap().push(connection.to_string());
        Ok(())
    }
}

/// Archive under `<tmp>/archive/snaps`, cache under `<tmp>/local/cache`.
/// `echo` stands in for mysqldump, `cat` for zcat and `true` for mysql.
pub(crate) struct TestEnv {
    _dir: TempDir,
    archive: Arc<LocalDiskStore>,
    local: Arc<LocalDiskStore>,
    utilities: Utilities,
    post_load_sqls: Vec<String>,
    executor: Arc<RecordingExecutor>,
}

impl TestEnv {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestEnv {
            archive: Arc::new(LocalDiskStore::new(dir.path().join("archive"))),
            local: Arc::new(LocalDiskStore::new(dir.path().join("local"))),
            _dir: dir,
            utilities: Utilities {
                mysqldump: "echo".to_string(),
                mysql: "true".to_string(),
                zcat: "cat".to_string(),
                gzip: None,
            },
            post_load_sqls: Vec::new(),
            executor: Arc::new(RecordingExecutor::default()),
        })
    }

    pub(crate) fn with_mysql(mysql: &str) -> anyhow::Result<Self> {
        let mut env = TestEnv::new()?;
        env.utilities.mysql = mysql.to_string();
        Ok(env)
    }

    pub(crate) fn with_mysqldump(mysqldump: &str) -> anyhow::Result<Self> {
        let mut env = TestEnv::new()?;
        env.utilities.mysqldump = mysqldump.to_string();
        Ok(env)
    }

    pub(crate) fn with_gzip(mut self, gzip: &str) -> Self {
        self.utilities.gzip = Some(gzip.to_string());
        self
    }

    pub(crate) fn with_global_statements(mut self, statements: &[&str]) -> Self {
        self.post_load_sqls = statements.iter().map(|s| s.to_string()).collect();
        self
    }

    pub(crate) fn context(&self, cache_by_default: bool) -> Arc<SnapshotContext> {
        let connections = HashMap::from([
            ("default".to_string(), connection("appdb")),
            ("reporting".to_string(), connection("reportdb")),
        ]);
        Arc::new(SnapshotContext {
            archive: self.archive.clone(),
            archive_path: "snaps".to_string(),
            local: self.local.clone(),
            local_path: "cache".to_string(),
            cache_by_default,
            environment: TEST_ENVIRONMENT.to_string(),
            utilities: self.utilities.clone(),
            connections,
            default_connection: Some("default".to_string()),
            post_load_sqls: self.post_load_sqls.clone(),
            runner: Arc::new(ShellRunner),
            executor: self.executor.clone(),
        })
    }

    pub(crate) fn plan(&self, name: &str, config: &PlanConfig, cache_by_default: bool) -> Result<SnapshotPlan> {
        SnapshotPlan::new(name, config, self.context(cache_by_default))
    }

    pub(crate) async fn archive_file(&self, path: &str, contents: &str) -> Result<()> {
        self.archive.put(path, contents.as_bytes().to_vec()).await
    }

    pub(crate) async fn remove_archive_file(&self, path: &str) -> Result<bool> {
        self.archive.delete(path).await
    }

    pub(crate) async fn archive_exists(&self, path: &str) -> Result<bool> {
        self.archive.exists(path).await
    }

    pub(crate) async fn archive_contents(&self, path: &str) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.archive.get(path).await?).to_string())
    }

    pub(crate) async fn archive_listing(&self, prefix: &str) -> Result<Vec<String>> {
        self.archive.list_all(prefix).await
    }

    pub(crate) async fn local_file(&self, path: &str, contents: &str) -> Result<()> {
        self.local.put(path, contents.as_bytes().to_vec()).await
    }

    pub(crate) async fn local_exists(&self, path: &str) -> Result<bool> {
        self.local.exists(path).await
    }

    pub(crate) async fn local_contents(&self, path: &str) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.local.get(path).await?).to_string())
    }

    pub(crate) async fn local_listing(&self, prefix: &str) -> Result<Vec<String>> {
        self.local.list_all(prefix).await
    }

    pub(crate) fn executed(&self) -> Vec<(String, String)> {
        self.executor.executed.lock().unwrap().clone()
    }

    pub(crate) fn dropped(&self) -> Vec<String> {
        self.executor.dropped.lock().unwrap().clone()
    }
}
