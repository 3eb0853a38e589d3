//! Database Snapshot Tool
//!
//! CLI for listing, creating, loading and deleting database snapshots

// dbsnapshots/src/main.rs
use anyhow::{Context, Result};
use dbsnapshots::catalog::SnapshotCatalog;
use dbsnapshots::config::{AppConfig, DEFAULT_CONFIG_FILE};
use dbsnapshots::context::SnapshotContext;
use dbsnapshots::group::{LoadOutcome, PlanGroup};
use dbsnapshots::plan::{RESERVED_PLAN_NAME, StatementResult};
use dbsnapshots::utils::format_bytes;
use dbsnapshots::utils::reporter::Reporter;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the snapshot tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let config_path = env::var("SNAPSHOTS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    let mut args = CliArgs::parse(env::args().skip(1));
    let command = match args.command.take() {
        Some(command) => command,
        None => prompt_choice()?,
    };

    let context = SnapshotContext::from_config(&config)
        .await
        .context("Failed to set up snapshot storage")?;
    let mut catalog = SnapshotCatalog::build(&config, Arc::new(context))
        .await
        .context("Failed to read snapshot plans")?;
    println!("🌍 Environment: {}", catalog.context().environment);

    let reporter = ConsoleReporter::default();
    match command.as_str() {
        "1" | "list" => list_snapshots(&catalog, args.positional.first().map(String::as_str)).await?,
        "2" | "create" => create_snapshots(&mut catalog, &args, &reporter).await?,
        "3" | "load" => load_snapshot(&catalog, &args, &reporter).await?,
        "4" | "delete" => delete_snapshot(&catalog, &args).await?,
        "5" | "clear-cache" => clear_cache(&catalog, &args).await?,
        _ => {
            println!("❌ Invalid choice. Use list, create, load, delete or clear-cache.");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Positional arguments and `--flag[=value]` options following the command.
#[derive(Debug, Default)]
struct CliArgs {
    command: Option<String>,
    positional: Vec<String>,
    flags: Vec<(String, Option<String>)>,
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut parsed = CliArgs::default();
        for arg in args {
            if let Some(flag) = arg.strip_prefix("--") {
                match flag.split_once('=') {
                    Some((name, value)) => parsed.flags.push((name.to_string(), Some(value.to_string()))),
                    None => parsed.flags.push((flag.to_string(), None)),
                }
            } else if parsed.command.is_none() {
                parsed.command = Some(arg.trim().to_string());
            } else {
                parsed.positional.push(arg);
            }
        }
        parsed
    }

    fn has(&self, name: &str) -> bool {
        self.flags.iter().any(|(flag, _)| flag == name)
    }

    /// `--recached` forces a fresh download even when `--cached` is given.
    fn use_local_copy(&self) -> bool {
        self.has("cached") && !self.has("recached")
    }

    fn keep_local_copy(&self, cache_by_default: bool) -> bool {
        self.has("cached") || self.has("recached") || cache_by_default
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(flag, _)| flag == name)
            .and_then(|(_, value)| value.as_deref())
    }
}

/// Prints progress messages and a percentage while downloading.
#[derive(Default)]
struct ConsoleReporter {
    last_percent: AtomicU64,
}

impl Reporter for ConsoleReporter {
    fn notify(&self, message: &str) {
        println!("   {}", message);
    }

    fn progress(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = done * 100 / total;
        if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
            print!("\r   ⬇️  {}% of {}", percent, format_bytes(total));
            let _ = std::io::stdout().flush();
        }
        if done >= total {
            println!();
            self.last_percent.store(0, Ordering::Relaxed);
        }
    }
}

async fn list_snapshots(catalog: &SnapshotCatalog, plan_name: Option<&str>) -> Result<()> {
    if plan_name == Some(RESERVED_PLAN_NAME) {
        let files = catalog.local_cached_files().await?;
        println!("📦 Cached files in {}:", catalog.context().local_path);
        if files.is_empty() {
            println!("   (none)");
        }
        for file in files {
            println!("   {} ({})", file.name, format_bytes(file.size));
        }
        return Ok(());
    }

    let plans = match plan_name {
        Some(name) => vec![
            catalog
                .plan(name)
                .with_context(|| format!("Unknown snapshot plan '{}'", name))?,
        ],
        None => catalog.plans().iter().collect(),
    };

    for plan in plans {
        println!(
            "📋 Plan {} ({} snapshots, keeping {})",
            plan.name(),
            plan.snapshots().len(),
            plan.keep_last()
        );
        if plan_name.is_some() {
            let settings = plan.settings();
            println!(
                "   template {} on connection {}, create lock '{}', load lock '{}'",
                settings.file_template, settings.connection, settings.create_lock, settings.load_lock
            );
        }
        for (index, snapshot) in plan.snapshots().iter().enumerate() {
            let size = snapshot
                .formatted_size(plan)
                .await
                .unwrap_or_else(|_| "?".to_string());
            let cached = if snapshot.exists_locally(plan).await? {
                " [cached]"
            } else {
                ""
            };
            println!(
                "   {:>3}. {}  {}  {}{}",
                index + 1,
                snapshot.file_name(),
                snapshot.timestamp().format("%Y-%m-%d %H:%M:%S"),
                size,
                cached
            );
        }
    }
    warn_unaccepted(catalog);
    Ok(())
}

async fn create_snapshots(catalog: &mut SnapshotCatalog, args: &CliArgs, reporter: &ConsoleReporter) -> Result<()> {
    let plan_names: Vec<String> = if let Some(group_name) = args.value("group") {
        let group: PlanGroup = catalog
            .group(group_name)?
            .cloned()
            .with_context(|| format!("Unknown plan group '{}'", group_name))?;
        println!("🚀 Creating snapshots for group {}...", group.name());
        let created = group
            .create_all(catalog.plans_mut(), reporter)
            .await
            .context("Snapshot creation failed")?;
        for snapshot in &created {
            println!("✅ Created {}", snapshot.file_name());
        }
        group
            .plan_names(catalog.plans())
            .into_iter()
            .map(String::from)
            .collect()
    } else {
        let names: Vec<String> = match args.value("plan") {
            Some(name) => vec![name.to_string()],
            None => catalog.plans().iter().map(|p| p.name().to_string()).collect(),
        };
        for name in &names {
            let plan = catalog
                .plan_mut(name)
                .with_context(|| format!("Unknown snapshot plan '{}'", name))?;
            if !plan.can_create() {
                println!("⏭️  Skipping {}: creating is locked in this environment", name);
                continue;
            }
            println!("🚀 Creating snapshot for plan {}...", name);
            let snapshot = plan
                .create(reporter)
                .await
                .with_context(|| format!("Snapshot creation failed for plan {}", name))?;
            println!("✅ Created {}", snapshot.file_name());
        }
        names
    };

    for name in &plan_names {
        if let Some(plan) = catalog.plan_mut(name) {
            if !plan.can_create() {
                continue;
            }
            let removed = plan.cleanup().await;
            if removed > 0 {
                println!("🧹 Removed {} old snapshot(s) of plan {}", removed, name);
            }
        }
    }
    warn_unaccepted(catalog);
    Ok(())
}

async fn load_snapshot(catalog: &SnapshotCatalog, args: &CliArgs, reporter: &ConsoleReporter) -> Result<()> {
    let use_local_copy = args.use_local_copy();
    let keep_local_copy = args.keep_local_copy(catalog.context().cache_by_default);
    let skip_post_commands = args.has("skip-post-commands");
    let drop_tables = args.has("drop-tables");
    let target = args.positional.first().map(String::as_str);

    if let Some(name) = target {
        if let Some(group) = catalog.group(name)? {
            return load_group(catalog, group, args, reporter).await;
        }
    }

    let plan = match target {
        Some(name) => catalog
            .plan(name)
            .with_context(|| format!("Unknown snapshot plan or group '{}'", name))?,
        None => catalog.plans().first().context("No snapshot plans configured")?,
    };
    if !plan.can_load() {
        anyhow::bail!(
            "Loading plan {} is locked in environment {}",
            plan.name(),
            catalog.context().environment
        );
    }

    let selector = args.positional.get(1).map(String::as_str).unwrap_or("1");
    let snapshot = plan
        .snapshot(selector)
        .cloned()
        .with_context(|| format!("No snapshot '{}' in plan {}", selector, plan.name()))?;

    if drop_tables {
        plan.drop_local_tables(reporter).await?;
    }
    println!("🔄 Loading {} from plan {}...", snapshot.file_name(), plan.name());
    let cache = snapshot
        .load(plan, use_local_copy, keep_local_copy, Some(reporter))
        .await
        .context("Restore process failed")?;
    println!("✅ Loaded {} ({})", snapshot.file_name(), cache.describe());

    if !skip_post_commands {
        print_statement_results(&plan.execute_post_load_commands(reporter).await);
    }

    let kept = keep_local_copy.then_some(snapshot.file_name());
    for cleared in plan.clear_cached(kept).await? {
        println!("🗑️  Removed cached {}", cleared);
    }
    warn_unaccepted(catalog);
    Ok(())
}

async fn load_group(
    catalog: &SnapshotCatalog,
    group: &PlanGroup,
    args: &CliArgs,
    reporter: &ConsoleReporter,
) -> Result<()> {
    let use_local_copy = args.use_local_copy();
    let keep_local_copy = args.keep_local_copy(catalog.context().cache_by_default);
    let skip_post_commands = args.has("skip-post-commands");

    if args.has("drop-tables") {
        group.drop_tables(catalog.plans(), reporter).await?;
    }

    println!("🔄 Loading group {}...", group.name());
    let results = group
        .load_all(
            catalog.plans(),
            use_local_copy,
            keep_local_copy,
            skip_post_commands,
            reporter,
        )
        .await;

    for result in &results {
        match &result.outcome {
            LoadOutcome::Loaded {
                snapshot,
                cache,
                post_load,
            } => {
                println!("✅ {}: loaded {} ({})", result.plan, snapshot, cache.describe());
                print_statement_results(post_load);
            }
            LoadOutcome::Skipped(_) => {
                println!("⏭️  {}: skipped ({})", result.plan, result.reason().unwrap_or_default());
            }
            LoadOutcome::Failed { error } => println!("❌ {}: {}", result.plan, error),
        }
    }

    if !skip_post_commands {
        print_statement_results(&group.execute_post_load_commands(catalog.plans(), reporter).await);
    }
    warn_unaccepted(catalog);

    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, LoadOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        anyhow::bail!("{} of {} plans failed to load", failed, results.len());
    }
    Ok(())
}

async fn delete_snapshot(catalog: &SnapshotCatalog, args: &CliArgs) -> Result<()> {
    const USAGE: &str = "Usage: dbsnapshots delete <plan> <file|index>";
    let plan_name = args.positional.first().context(USAGE)?;
    let selector = args.positional.get(1).context(USAGE)?;
    let plan = catalog
        .plan(plan_name)
        .with_context(|| format!("Unknown snapshot plan '{}'", plan_name))?;
    let snapshot = plan
        .snapshot(selector)
        .with_context(|| format!("No snapshot '{}' in plan {}", selector, plan_name))?;

    if snapshot.remove(plan).await? {
        println!("🗑️  Deleted {}", snapshot.file_name());
    } else {
        println!("⚠️  {} was already gone from the archive", snapshot.file_name());
    }
    Ok(())
}

async fn clear_cache(catalog: &SnapshotCatalog, args: &CliArgs) -> Result<()> {
    let cleared = catalog.clear_local_cache(args.value("except-file")).await?;
    for name in &cleared {
        println!("🗑️  Removed cached {}", name);
    }
    println!("🧹 Cleared {} cached file(s)", cleared.len());
    Ok(())
}

fn print_statement_results(results: &[StatementResult]) {
    for result in results {
        match &result.error {
            None => println!("   ✔ {}", result.statement),
            Some(error) => println!("   ✘ {} ({})", result.statement, error),
        }
    }
}

fn warn_unaccepted(catalog: &SnapshotCatalog) {
    let unaccepted = catalog.unaccepted_files();
    if unaccepted.is_empty() {
        return;
    }
    println!("⚠️  {} archive file(s) match no plan:", unaccepted.len());
    for file in unaccepted {
        println!("   {}", file);
    }
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout};

    println!("Select an operation:");
    println!("1. List snapshots (or type 'list')");
    println!("2. Create snapshots (or type 'create')");
    println!("3. Load the newest snapshot (or type 'load')");
    println!("4. Delete a snapshot (or type 'delete <plan> <file|index>')");
    println!("5. Clear the local cache (or type 'clear-cache')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
