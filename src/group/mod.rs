//! Plan groups: several plans created, loaded and post-processed together.

use serde::Serialize;

use crate::config::PlanGroupConfig;
use crate::errors::{Result, SnapshotError};
use crate::plan::post_load::run_statements;
use crate::plan::{SnapshotPlan, StatementResult, StatementScope};
use crate::snapshot::{CacheInfo, Snapshot};
use crate::utils::reporter::Reporter;

/// An ordered set of plans. Plans are referenced by their index in the plan
/// slice the group was built from; every method expects that same slice.
#[derive(Debug, Clone)]
pub struct PlanGroup {
    name: String,
    plan_indices: Vec<usize>,
    post_load_sqls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EnvironmentLock,
    NoSnapshots,
}

#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded {
        snapshot: String,
        cache: CacheInfo,
        post_load: Vec<StatementResult>,
    },
    Skipped(SkipReason),
    Failed { error: String },
}

/// Outcome of loading one plan as part of a group.
#[derive(Debug, Clone)]
pub struct PlanLoadResult {
    pub plan: String,
    pub outcome: LoadOutcome,
}

impl PlanLoadResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded { .. })
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self.outcome {
            LoadOutcome::Loaded { .. } => None,
            LoadOutcome::Skipped(SkipReason::EnvironmentLock) => Some("environment_lock"),
            LoadOutcome::Skipped(SkipReason::NoSnapshots) => Some("no_snapshots"),
            LoadOutcome::Failed { .. } => Some("exception"),
        }
    }
}

impl PlanGroup {
    pub fn new(name: &str, config: &PlanGroupConfig, plans: &[SnapshotPlan]) -> Result<Self> {
        if config.plans.is_empty() {
            return Err(SnapshotError::config(format!("Plan group '{}' has no plans", name)));
        }

        let plan_indices = config
            .plans
            .iter()
            .map(|plan_name| {
                plans.iter().position(|p| p.name() == plan_name).ok_or_else(|| {
                    SnapshotError::config(format!(
                        "Plan group '{}' references unknown plan '{}'",
                        name, plan_name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PlanGroup {
            name: name.to_string(),
            plan_indices,
            post_load_sqls: config.post_load_sqls.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post_load_sqls(&self) -> &[String] {
        &self.post_load_sqls
    }

    pub fn plans<'a>(&'a self, plans: &'a [SnapshotPlan]) -> impl Iterator<Item = &'a SnapshotPlan> + 'a {
        self.plan_indices.iter().map(move |&i| &plans[i])
    }

    pub fn plan_names<'a>(&'a self, plans: &'a [SnapshotPlan]) -> Vec<&'a str> {
        self.plans(plans).map(|p| p.name()).collect()
    }

    /// Creates a snapshot for every member that may create in this
    /// environment. Locked plans are skipped; a failed dump aborts the batch.
    pub async fn create_all(&self, plans: &mut [SnapshotPlan], reporter: &dyn Reporter) -> Result<Vec<Snapshot>> {
        let mut created = Vec::new();
        for &index in &self.plan_indices {
            let plan = &mut plans[index];
            if !plan.can_create() {
                reporter.notify(&format!(
                    "Skipping plan {}: creating is locked in this environment",
                    plan.name()
                ));
                continue;
            }
            created.push(plan.create(reporter).await?);
        }
        Ok(created)
    }

    /// Loads the newest snapshot of every member. Each plan's outcome is
    /// recorded and a failure never stops the remaining plans.
    pub async fn load_all(
        &self,
        plans: &[SnapshotPlan],
        use_local_copy: bool,
        keep_local_copy: bool,
        skip_post_commands: bool,
        reporter: &dyn Reporter,
    ) -> Vec<PlanLoadResult> {
        let mut results = Vec::with_capacity(self.plan_indices.len());
        for plan in self.plans(plans) {
            let outcome =
                load_newest(plan, use_local_copy, keep_local_copy, skip_post_commands, reporter).await;
            if let LoadOutcome::Failed { error } = &outcome {
                tracing::error!("Loading plan {} failed: {}", plan.name(), error);
            }
            results.push(PlanLoadResult {
                plan: plan.name().to_string(),
                outcome,
            });
        }
        results
    }

    /// Runs the group's own statements on the first member's connection.
    pub async fn execute_post_load_commands(
        &self,
        plans: &[SnapshotPlan],
        reporter: &dyn Reporter,
    ) -> Vec<StatementResult> {
        let Some(first) = self.plans(plans).next() else {
            return Vec::new();
        };
        run_statements(
            first.context().executor.as_ref(),
            first.connection(),
            &self.post_load_sqls,
            StatementScope::PlanGroup,
            reporter,
        )
        .await
    }

    /// Drops all tables once for each distinct connection among the members.
    pub async fn drop_tables(&self, plans: &[SnapshotPlan], reporter: &dyn Reporter) -> Result<()> {
        let mut dropped: Vec<&str> = Vec::new();
        for plan in self.plans(plans) {
            if dropped.contains(&plan.connection()) {
                continue;
            }
            plan.drop_local_tables(reporter).await?;
            dropped.push(plan.connection());
        }
        Ok(())
    }
}

async fn load_newest(
    plan: &SnapshotPlan,
    use_local_copy: bool,
    keep_local_copy: bool,
    skip_post_commands: bool,
    reporter: &dyn Reporter,
) -> LoadOutcome {
    if !plan.can_load() {
        reporter.notify(&format!(
            "Skipping plan {}: loading is locked in this environment",
            plan.name()
        ));
        return LoadOutcome::Skipped(SkipReason::EnvironmentLock);
    }
    let Some(snapshot) = plan.snapshots().first() else {
        reporter.notify(&format!("Skipping plan {}: no snapshots", plan.name()));
        return LoadOutcome::Skipped(SkipReason::NoSnapshots);
    };

    reporter.notify(&format!("Loading {} for plan {}", snapshot.file_name(), plan.name()));
    match snapshot
        .load(plan, use_local_copy, keep_local_copy, Some(reporter))
        .await
    {
        Ok(cache) => {
            let post_load = if skip_post_commands {
                Vec::new()
            } else {
                plan.execute_post_load_commands(reporter).await
            };
            LoadOutcome::Loaded {
                snapshot: snapshot.file_name().to_string(),
                cache,
                post_load,
            }
        }
        Err(e) => LoadOutcome::Failed { error: e.to_string() },
    }
}
