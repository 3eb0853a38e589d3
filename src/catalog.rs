//! The configured plans and groups, populated from the archive listing.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::context::SnapshotContext;
use crate::errors::{Result, SnapshotError};
use crate::group::PlanGroup;
use crate::plan::{SnapshotPlan, discover};
use crate::snapshot::cache::{METADATA_SUFFIX, is_metadata_file};
use crate::storage::relative_to;

pub struct SnapshotCatalog {
    plans: Vec<SnapshotPlan>,
    groups: Vec<PlanGroup>,
    unaccepted_files: Vec<String>,
    context: Arc<SnapshotContext>,
}

/// A file in the local cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub name: String,
    pub size: u64,
}

impl SnapshotCatalog {
    /// Builds every plan and group, then lists the archive once and hands
    /// each file to the plan that claims it.
    pub async fn build(config: &AppConfig, context: Arc<SnapshotContext>) -> Result<Self> {
        if config.plans.is_empty() {
            return Err(SnapshotError::config(
                "plans does not contain any configured snapshot plans",
            ));
        }

        let mut plans = config
            .plans
            .iter()
            .map(|(name, plan)| SnapshotPlan::new(name, plan, Arc::clone(&context)))
            .collect::<Result<Vec<_>>>()?;

        let groups = config
            .plan_groups
            .iter()
            .map(|(name, group)| PlanGroup::new(name, group, &plans))
            .collect::<Result<Vec<_>>>()?;

        let archive_files = context.archive.list_all(&context.archive_path).await?;
        let unaccepted_files = discover(&mut plans, &archive_files, &context.archive_path);
        for file in &unaccepted_files {
            tracing::warn!("No plan accepts archive file {}", file);
        }

        Ok(SnapshotCatalog {
            plans,
            groups,
            unaccepted_files,
            context,
        })
    }

    pub fn context(&self) -> &SnapshotContext {
        &self.context
    }

    pub fn plans(&self) -> &[SnapshotPlan] {
        &self.plans
    }

    pub fn plans_mut(&mut self) -> &mut [SnapshotPlan] {
        &mut self.plans
    }

    pub fn plan(&self, name: &str) -> Option<&SnapshotPlan> {
        self.plans.iter().find(|p| p.name() == name)
    }

    pub fn plan_mut(&mut self, name: &str) -> Option<&mut SnapshotPlan> {
        self.plans.iter_mut().find(|p| p.name() == name)
    }

    pub fn groups(&self) -> &[PlanGroup] {
        &self.groups
    }

    /// Looks a group up by name. An empty name is a caller error.
    pub fn group(&self, name: &str) -> Result<Option<&PlanGroup>> {
        if name.trim().is_empty() {
            return Err(SnapshotError::config("A plan group name is required"));
        }
        Ok(self.groups.iter().find(|g| g.name() == name))
    }

    /// Archive files no plan claimed, as full archive paths.
    pub fn unaccepted_files(&self) -> &[String] {
        &self.unaccepted_files
    }

    /// Files currently in the local cache, metadata sidecars excluded.
    pub async fn local_cached_files(&self) -> Result<Vec<CachedFile>> {
        let context = &self.context;
        let mut files = Vec::new();
        for path in context.local.list_all(&context.local_path).await? {
            let Some(name) = relative_to(&context.local_path, &path) else {
                continue;
            };
            if is_metadata_file(name) {
                continue;
            }
            files.push(CachedFile {
                name: name.to_string(),
                size: context.local.size(&path).await?,
            });
        }
        Ok(files)
    }

    /// Deletes every file in the local cache directory, whichever plan wrote
    /// it, except `except` and its metadata. Returns the removed file names.
    pub async fn clear_local_cache(&self, except: Option<&str>) -> Result<Vec<String>> {
        let context = &self.context;
        let kept_metadata = except.map(|name| format!("{}{}", name, METADATA_SUFFIX));
        let mut deleted = Vec::new();
        for path in context.local.list_all(&context.local_path).await? {
            let Some(name) = relative_to(&context.local_path, &path) else {
                continue;
            };
            if Some(name) == except || kept_metadata.as_deref() == Some(name) {
                continue;
            }
            tracing::info!("Deleting {}", path);
            context.local.delete(&path).await?;
            if !is_metadata_file(name) {
                deleted.push(name.to_string());
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlanGroupConfig;
    use crate::test_support::{TestEnv, plan_config};

    fn app_config(plans: &[(&str, &str)], groups: &[(&str, &[&str])]) -> AppConfig {
        let mut config = AppConfig::from_json_str(
            r#"{"filesystem": {"archive_disk": "local", "archive_root": "/tmp"}}"#,
        )
        .unwrap();
        config.plans = plans
            .iter()
            .map(|(name, template)| (name.to_string(), plan_config(template)))
            .collect();
        config.plan_groups = groups
            .iter()
            .map(|(name, members)| {
                (
                    name.to_string(),
                    PlanGroupConfig {
                        plans: members.iter().map(|m| m.to_string()).collect(),
                        post_load_sqls: Vec::new(),
                    },
                )
            })
            .collect();
        config
    }

    #[tokio::test]
    async fn test_build_discovers_snapshots_and_orphans() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.archive_file("snaps/snap-20240913.sql.gz", "a").await?;
        env.archive_file("snaps/snap-20240912.sql.gz", "b").await?;
        env.archive_file("snaps/snap-v8-20240913.sql.gz", "c").await?;

        let config = app_config(&[("daily", "snap-{date:Ymd}")], &[("all", &["daily"])]);
        let catalog = SnapshotCatalog::build(&config, env.context(false)).await?;

        let plan = catalog.plan("daily").expect("plan exists");
        assert_eq!(plan.snapshots()[0].file_name(), "snap-20240913.sql.gz");
        assert_eq!(plan.snapshots().len(), 2);
        assert_eq!(catalog.unaccepted_files(), ["snaps/snap-v8-20240913.sql.gz"]);
        assert!(catalog.plan("missing").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_group_lookup() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let config = app_config(&[("snap", "snap-{date}")], &[("all", &["snap"])]);
        let catalog = SnapshotCatalog::build(&config, env.context(false)).await?;

        assert!(catalog.group("").is_err());
        assert!(catalog.group("nope")?.is_none());
        assert_eq!(catalog.group("all")?.map(|g| g.name()), Some("all"));
        Ok(())
    }

    #[tokio::test]
    async fn test_build_rejects_empty_plans_and_bad_groups() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        let empty = app_config(&[], &[]);
        let err = SnapshotCatalog::build(&empty, env.context(false)).await.err();
        assert!(err.is_some_and(|e| e.is_config()));

        let bad_group = app_config(&[("snap", "snap-{date}")], &[("all", &["snap", "other"])]);
        assert!(SnapshotCatalog::build(&bad_group, env.context(false)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_cached_files_hide_metadata() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.local_file("cache/snap-20240913.sql.gz", "abc").await?;
        env.local_file("cache/snap-20240913.sql.gz.meta.json", "{}").await?;
        let config = app_config(&[("snap", "snap-{date}")], &[]);
        let catalog = SnapshotCatalog::build(&config, env.context(false)).await?;

        assert_eq!(
            catalog.local_cached_files().await?,
            vec![CachedFile {
                name: "snap-20240913.sql.gz".to_string(),
                size: 3
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_local_cache_removes_files_of_retired_plans() -> anyhow::Result<()> {
        let env = TestEnv::new()?;
        env.local_file("cache/snap-20240913.sql.gz", "a").await?;
        env.local_file("cache/snap-20240913.sql.gz.meta.json", "{}").await?;
        env.local_file("cache/retired-20230101.sql.gz", "b").await?;
        env.local_file("cache/snap-20240912.sql.gz", "c").await?;
        env.local_file("cache/snap-20240912.sql.gz.meta.json", "{}").await?;
        let config = app_config(&[("snap", "snap-{date:Ymd}")], &[]);
        let catalog = SnapshotCatalog::build(&config, env.context(false)).await?;

        let mut cleared = catalog.clear_local_cache(Some("snap-20240913.sql.gz")).await?;
        cleared.sort();
        assert_eq!(cleared, vec!["retired-20230101.sql.gz", "snap-20240912.sql.gz"]);
        assert_eq!(
            env.local_listing("cache").await?,
            vec!["cache/snap-20240913.sql.gz", "cache/snap-20240913.sql.gz.meta.json"]
        );
        Ok(())
    }
}
