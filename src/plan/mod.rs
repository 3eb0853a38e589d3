pub mod discovery;
pub mod dump;
pub mod post_load;

use chrono::Local;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{ConnectionConfig, DEFAULT_FILE_TEMPLATE, EnvironmentLocks, PlanConfig};
use crate::context::SnapshotContext;
use crate::errors::{Result, SnapshotError};
use crate::snapshot::Snapshot;
use crate::snapshot::cache::{self, is_metadata_file};
use crate::storage::relative_to;
use crate::template::FileTemplate;
use crate::utils::environment::environment_matches;
use crate::utils::find_executable;
use crate::utils::reporter::Reporter;
use crate::utils::runner::{DumpVariant, run_with_credentials, shell_quote};

pub use discovery::discover;
pub use post_load::{StatementResult, StatementScope};

/// Name reserved for the pseudo-plan that lists locally cached files.
pub const RESERVED_PLAN_NAME: &str = "cached";

/// A named recipe for dumping one database and the snapshots it owns,
/// newest first.
pub struct SnapshotPlan {
    name: String,
    connection: String,
    file_template: FileTemplate,
    mysqldump_options: String,
    tables: Vec<String>,
    ignore_tables: Vec<String>,
    schema_only_tables: Vec<String>,
    keep_last: usize,
    environment_locks: EnvironmentLocks,
    post_load_sqls: Vec<String>,
    snapshots: Vec<Snapshot>,
    context: Arc<SnapshotContext>,
}

/// Read-only view of a plan's configuration.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSettings {
    pub name: String,
    pub connection: String,
    pub file_template: String,
    pub mysqldump_options: String,
    pub tables: Vec<String>,
    pub ignore_tables: Vec<String>,
    pub schema_only_tables: Vec<String>,
    pub keep_last: usize,
    pub create_lock: String,
    pub load_lock: String,
}

fn unique(values: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(values.len());
    for value in values {
        if !seen.contains(value) {
            seen.push(value.clone());
        }
    }
    seen
}

impl SnapshotPlan {
    pub fn new(name: &str, config: &PlanConfig, context: Arc<SnapshotContext>) -> Result<Self> {
        if name == RESERVED_PLAN_NAME {
            return Err(SnapshotError::config(format!(
                "'{}' is a reserved name and cannot be used for a snapshot plan",
                RESERVED_PLAN_NAME
            )));
        }

        let tables = unique(&config.tables);
        let ignore_tables = unique(&config.ignore_tables);
        let schema_only_tables = unique(&config.schema_only_tables);

        if !tables.is_empty() && !ignore_tables.is_empty() {
            return Err(SnapshotError::config(format!(
                "Plan '{}' cannot configure both tables and ignore_tables",
                name
            )));
        }
        if !tables.is_empty() {
            if let Some(missing) = schema_only_tables.iter().find(|t| !tables.contains(t)) {
                return Err(SnapshotError::config(format!(
                    "Plan '{}' lists schema-only table '{}' that is not in its tables",
                    name, missing
                )));
            }
        }

        let file_template = FileTemplate::parse(
            config.file_template.as_deref().unwrap_or(DEFAULT_FILE_TEMPLATE),
        )
        .map_err(|e| SnapshotError::config(format!("Plan '{}': {}", name, e)))?;

        let connection = config
            .connection
            .clone()
            .or_else(|| context.default_connection.clone())
            .unwrap_or_else(|| "default".to_string());
        context.connection(&connection)?;

        Ok(SnapshotPlan {
            name: name.to_string(),
            connection,
            file_template,
            mysqldump_options: config.mysqldump_options.clone(),
            tables,
            ignore_tables,
            schema_only_tables,
            keep_last: config.keep_last,
            environment_locks: config.environment_locks.clone(),
            post_load_sqls: config.post_load_sqls.clone(),
            snapshots: Vec::new(),
            context,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn connection_config(&self) -> Result<&ConnectionConfig> {
        self.context.connection(&self.connection)
    }

    pub fn context(&self) -> &SnapshotContext {
        &self.context
    }

    pub fn file_template(&self) -> &FileTemplate {
        &self.file_template
    }

    pub fn keep_last(&self) -> usize {
        self.keep_last
    }

    pub fn post_load_sqls(&self) -> &[String] {
        &self.post_load_sqls
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn settings(&self) -> PlanSettings {
        PlanSettings {
            name: self.name.clone(),
            connection: self.connection.clone(),
            file_template: self.file_template.to_string(),
            mysqldump_options: self.mysqldump_options.clone(),
            tables: self.tables.clone(),
            ignore_tables: self.ignore_tables.clone(),
            schema_only_tables: self.schema_only_tables.clone(),
            keep_last: self.keep_last,
            create_lock: self.environment_locks.create.clone(),
            load_lock: self.environment_locks.load.clone(),
        }
    }

    pub fn can_create(&self) -> bool {
        environment_matches(&self.environment_locks.create, &self.context.environment)
    }

    pub fn can_load(&self) -> bool {
        environment_matches(&self.environment_locks.load, &self.context.environment)
    }

    /// Looks a snapshot up by 1-based position in the listing or by file name.
    pub fn snapshot(&self, selector: &str) -> Option<&Snapshot> {
        if let Ok(index) = selector.parse::<usize>() {
            return index.checked_sub(1).and_then(|i| self.snapshots.get(i));
        }
        self.snapshots.iter().find(|s| s.file_name() == selector)
    }

    /// Claims `file_name` when it matches this plan's template. Sorting is
    /// left to the caller.
    pub fn accept(&mut self, file_name: &str) -> bool {
        match self.file_template.match_name(file_name) {
            Some(timestamp) => {
                self.snapshots.push(Snapshot::new(file_name, timestamp));
                true
            }
            None => false,
        }
    }

    /// Newest first; equal timestamps keep their relative order.
    pub fn sort_snapshots(&mut self) {
        self.snapshots.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    }

    /// How many snapshots `cleanup` would remove.
    pub fn cleanup_count(&self) -> usize {
        self.snapshots.len().saturating_sub(self.keep_last)
    }

    /// Removes every snapshot beyond the newest `keep_last`. Returns how many
    /// were actually deleted from the archive.
    pub async fn cleanup(&mut self) -> usize {
        if self.snapshots.len() <= self.keep_last {
            return 0;
        }
        let expired = self.snapshots.split_off(self.keep_last);
        let mut removed = 0;
        for snapshot in &expired {
            match snapshot.remove(self).await {
                Ok(true) => removed += 1,
                Ok(false) => tracing::warn!("Snapshot {} was already gone", snapshot.file_name()),
                Err(e) => tracing::warn!("Failed to remove snapshot {}: {}", snapshot.file_name(), e),
            }
        }
        removed
    }

    /// Dumps the database, compresses and uploads the result, and records the
    /// new snapshot.
    pub async fn create(&mut self, reporter: &dyn Reporter) -> Result<Snapshot> {
        let now = Local::now().naive_local();
        let stem = self.file_template.render(&now);
        let sql_name = format!("{}.sql", stem);
        let context = Arc::clone(&self.context);

        context.local.make_directory(&context.local_path).await?;
        let sql_file = context.local_file(&sql_name);
        let sql_path = context.local.local_path(&sql_file).ok_or_else(|| {
            SnapshotError::storage(format!("Local store has no filesystem path for {}", sql_file))
        })?;
        let target = shell_quote(&sql_path.to_string_lossy());

        let connection = context.connection(&self.connection)?;
        let utilities = &context.utilities;
        find_executable(&utilities.mysqldump)?;
        let variant = DumpVariant::detect(context.runner.as_ref(), &utilities.mysqldump).await;
        let options = variant.effective_options(&self.mysqldump_options);

        reporter.notify(&format!("Dumping {} for plan {}", connection.database, self.name));
        for command in self.dump_commands(&utilities.mysqldump, &options, &target) {
            if let Err(e) = run_with_credentials(context.runner.as_ref(), connection, &command).await {
                context.local.delete(&sql_file).await?;
                return Err(e);
            }
        }

        let file_name = match utilities.gzip() {
            Some(gzip) => {
                let gz_name = format!("{}.gz", sql_name);
                let gz_file = context.local_file(&gz_name);
                reporter.notify(&format!("Compressing {}", sql_name));
                let command = format!("{} -f {}", gzip, target);
                let failure = match context.runner.run(&command).await {
                    Ok(output) if output.success => None,
                    Ok(output) => Some(SnapshotError::Command {
                        command,
                        stderr: output.diagnostic(),
                    }),
                    Err(e) => Some(e),
                };
                if let Some(e) = failure {
                    context.local.delete(&sql_file).await?;
                    context.local.delete(&gz_file).await?;
                    return Err(e);
                }
                gz_name
            }
            None => sql_name,
        };

        let local_file = context.local_file(&file_name);
        let local_path = context.local.local_path(&local_file).ok_or_else(|| {
            SnapshotError::storage(format!("Local store has no filesystem path for {}", local_file))
        })?;
        reporter.notify(&format!("Uploading {}", file_name));
        let uploaded = context
            .archive
            .put_file(&context.archive_file(&file_name), &local_path)
            .await;
        context.local.delete(&local_file).await?;
        uploaded?;

        let timestamp = self.file_template.match_name(&file_name).unwrap_or(now);
        let snapshot = Snapshot::new(file_name, timestamp);
        if !self.snapshots.iter().any(|s| s.file_name() == snapshot.file_name()) {
            self.snapshots.insert(0, snapshot.clone());
            self.sort_snapshots();
        }
        tracing::info!("Created snapshot {} for plan {}", snapshot.file_name(), self.name);
        Ok(snapshot)
    }

    /// Deletes this plan's locally cached files, except `except`. Returns the
    /// deleted file names.
    pub async fn clear_cached(&self, except: Option<&str>) -> Result<Vec<String>> {
        let context = &self.context;
        let mut deleted = Vec::new();
        for path in context.local.list_all(&context.local_path).await? {
            let Some(name) = relative_to(&context.local_path, &path) else {
                continue;
            };
            if is_metadata_file(name) || Some(name) == except {
                continue;
            }
            if self.file_template.match_name(name).is_none() {
                continue;
            }
            context.local.delete(&path).await?;
            cache::delete_metadata(context, name).await?;
            deleted.push(name.to_string());
        }
        Ok(deleted)
    }

    /// Runs global statements, then this plan's, each recorded separately.
    /// Failures are captured and do not stop later statements.
    pub async fn execute_post_load_commands(&self, reporter: &dyn Reporter) -> Vec<StatementResult> {
        let executor = self.context.executor.as_ref();
        let mut results = post_load::run_statements(
            executor,
            &self.connection,
            &self.context.post_load_sqls,
            StatementScope::Global,
            reporter,
        )
        .await;
        results.extend(
            post_load::run_statements(
                executor,
                &self.connection,
                &self.post_load_sqls,
                StatementScope::Plan,
                reporter,
            )
            .await,
        );
        results
    }

    pub async fn drop_local_tables(&self, reporter: &dyn Reporter) -> Result<()> {
        reporter.notify(&format!("Dropping all tables on connection {}", self.connection));
        self.context.executor.drop_all_tables(&self.connection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestEnv, plan_config};
    use crate::utils::reporter::NoopReporter;

    #[test]
    fn test_tables_and_ignore_tables_are_exclusive() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut config = plan_config("app-{date}");
        config.tables = vec!["a".to_string()];
        config.ignore_tables = vec!["b".to_string()];
        let err = env.plan("app", &config, false).err().expect("plan should be rejected");
        assert!(err.is_config());
        Ok(())
    }

    #[test]
    fn test_schema_only_tables_must_be_listed() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut config = plan_config("app-{date}");
        config.tables = vec!["a".to_string()];
        config.schema_only_tables = vec!["b".to_string()];
        assert!(env.plan("app", &config, false).is_err());

        config.tables = Vec::new();
        assert!(env.plan("app", &config, false).is_ok());
        Ok(())
    }

    #[test]
    fn test_reserved_name_and_bad_template_are_rejected() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        assert!(env.plan(RESERVED_PLAN_NAME, &plan_config("app-{date}"), false).is_err());
        assert!(env.plan("app", &plan_config("app-{time}"), false).is_err());

        let mut config = plan_config("app-{date}");
        config.connection = Some("warehouse".to_string());
        let err = env.plan("app", &config, false).err().expect("plan should be rejected");
        assert!(err.is_config());
        Ok(())
    }

    #[test]
    fn test_environment_locks() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut config = plan_config("app-{date}");
        config.environment_locks = EnvironmentLocks {
            create: "production".to_string(),
            load: "test*".to_string(),
        };
        let plan = env.plan("app", &config, false)?;
        assert!(!plan.can_create());
        assert!(plan.can_load());

        let settings = plan.settings();
        assert_eq!(settings.file_template, "app-{date}");
        assert_eq!(settings.connection, "default");
        assert_eq!(settings.load_lock, "test*");
        Ok(())
    }

    #[test]
    fn test_accept_sort_and_select() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut plan = env.plan("app", &plan_config("app-{date:Ymd}"), false)?;
        assert!(plan.accept("app-20240911.sql.gz"));
        assert!(plan.accept("app-20240913.sql.gz"));
        assert!(plan.accept("app-20240912.sql.gz"));
        assert!(!plan.accept("other-20240912.sql.gz"));
        plan.sort_snapshots();

        let names: Vec<_> = plan.snapshots().iter().map(|s| s.file_name()).collect();
        assert_eq!(
            names,
            vec!["app-20240913.sql.gz", "app-20240912.sql.gz", "app-20240911.sql.gz"]
        );
        assert_eq!(plan.snapshot("2").map(|s| s.file_name()), Some("app-20240912.sql.gz"));
        assert_eq!(
            plan.snapshot("app-20240911.sql.gz").map(|s| s.file_name()),
            Some("app-20240911.sql.gz")
        );
        assert!(plan.snapshot("0").is_none());
        assert!(plan.snapshot("4").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut config = plan_config("app-{date:Ymd}");
        config.keep_last = 2;
        let mut plan = env.plan("app", &config, false)?;
        for day in 10..15 {
            let name = format!("app-202409{}.sql", day);
            env.archive_file(&format!("snaps/{}", name), "dump").await?;
            assert!(plan.accept(&name));
        }
        plan.sort_snapshots();

        assert_eq!(plan.cleanup_count(), 3);
        assert_eq!(plan.cleanup().await, 3);
        let names: Vec<_> = plan.snapshots().iter().map(|s| s.file_name()).collect();
        assert_eq!(names, vec!["app-20240914.sql", "app-20240913.sql"]);
        assert!(!env.archive_exists("snaps/app-20240910.sql").await?);
        assert!(env.archive_exists("snaps/app-20240913.sql").await?);
        assert_eq!(plan.cleanup().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_keep_last_zero_removes_everything() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut config = plan_config("app-{date:Ymd}");
        config.keep_last = 0;
        let mut plan = env.plan("app", &config, false)?;
        for day in 11..14 {
            let name = format!("app-202409{}.sql", day);
            env.archive_file(&format!("snaps/{}", name), "dump").await?;
            assert!(plan.accept(&name));
        }
        plan.sort_snapshots();

        assert_eq!(plan.cleanup_count(), 3);
        assert_eq!(plan.cleanup().await, 3);
        assert!(plan.snapshots().is_empty());
        assert!(env.archive_listing("snaps").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_twice_in_same_period_keeps_one_entry() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut plan = env.plan("app", &plan_config("app-{date:Ymd}"), false)?;

        let first = plan.create(&NoopReporter).await?;
        let second = plan.create(&NoopReporter).await?;
        assert_eq!(first.file_name(), second.file_name());
        assert_eq!(plan.snapshots().len(), 1);
        assert_eq!(env.archive_listing("snaps").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_dumps_selected_tables_and_uploads() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let mut config = plan_config("app-{date:YmdHis}");
        config.tables = vec!["foo".to_string(), "bar".to_string(), "bam".to_string()];
        config.schema_only_tables = vec!["bar".to_string()];
        let mut plan = env.plan("app", &config, false)?;

        let snapshot = plan.create(&NoopReporter).await?;
        assert!(snapshot.file_name().starts_with("app-"));
        assert!(snapshot.file_name().ends_with(".sql"));
        assert_eq!(plan.snapshots().len(), 1);

        let archived = env.archive_contents(&format!("snaps/{}", snapshot.file_name())).await?;
        let lines: Vec<_> = archived.lines().map(|l| l.trim()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("appdb foo bam"));
        assert!(lines[1].ends_with("--no-data appdb bar"));

        assert!(!env.local_exists(&format!("cache/{}", snapshot.file_name())).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_failure_removes_partial_dump() -> anyhow::Result<()> {
        let env = TestEnv::with_mysqldump("false")?;
        let mut plan = env.plan("app", &plan_config("app-{date:YmdHis}"), false)?;

        let err = plan.create(&NoopReporter).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Command { .. }));
        assert!(plan.snapshots().is_empty());
        assert!(env.local_listing("cache").await?.is_empty());
        assert!(env.archive_listing("snaps").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_compression_failure_removes_both_files() -> anyhow::Result<()> {
        let env = TestEnv::new()?.with_gzip("false");
        let mut plan = env.plan("app", &plan_config("app-{date:YmdHis}"), false)?;

        let err = plan.create(&NoopReporter).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Command { .. }));
        assert!(env.local_listing("cache").await?.is_empty());
        assert!(env.archive_listing("snaps").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_cached_only_touches_own_files() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let plan = env.plan("app", &plan_config("app-{date:Ymd}"), false)?;
        env.local_file("cache/app-20240912.sql", "a").await?;
        env.local_file("cache/app-20240912.sql.meta.json", "{}").await?;
        env.local_file("cache/app-20240913.sql", "b").await?;
        env.local_file("cache/other-20240913.sql", "c").await?;

        let deleted = plan.clear_cached(Some("app-20240913.sql")).await?;
        assert_eq!(deleted, vec!["app-20240912.sql"]);
        assert_eq!(
            env.local_listing("cache").await?,
            vec!["cache/app-20240913.sql", "cache/other-20240913.sql"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_post_load_commands_run_global_then_plan() -> anyhow::Result<()> {
        let env = TestEnv::new()?.with_global_statements(&["SET @a = 1", "FAIL global"]);
        let mut config = plan_config("app-{date}");
        config.post_load_sqls = vec!["UPDATE users SET email = NULL".to_string()];
        let plan = env.plan("app", &config, false)?;

        let results = plan.execute_post_load_commands(&NoopReporter).await;
        let scopes: Vec<_> = results.iter().map(|r| (r.scope, r.success)).collect();
        assert_eq!(
            scopes,
            vec![
                (StatementScope::Global, true),
                (StatementScope::Global, false),
                (StatementScope::Plan, true),
            ]
        );
        assert!(results[1].error.is_some());
        assert_eq!(
            env.executed(),
            vec![
                ("default".to_string(), "SET @a = 1".to_string()),
                ("default".to_string(), "UPDATE users SET email = NULL".to_string()),
            ]
        );
        Ok(())
    }
}
