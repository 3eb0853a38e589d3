// dbsnapshots/src/utils/runner.rs
use async_trait::async_trait;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::config::ConnectionConfig;
use crate::errors::{Result, SnapshotError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Best available explanation of a failure.
    pub fn diagnostic(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else if !self.stdout.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            "Unknown error".to_string()
        }
    }
}

/// Runs fully assembled shell command lines (dump, restore, compress) and
/// waits for them to finish.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c` so pipes and redirects work.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        tracing::debug!("Running: {}", command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| SnapshotError::Command {
                command: command.to_string(),
                stderr: format!("Failed to spawn shell: {}", e),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Contents of a MySQL option file carrying the client credentials.
pub fn credentials_file_contents(connection: &ConnectionConfig) -> String {
    [
        "[client]".to_string(),
        format!("user = '{}'", connection.username),
        format!("password = '{}'", connection.password),
        format!("host = '{}'", connection.dump_host()),
        format!("port = '{}'", connection.port),
    ]
    .join("\n")
}

/// Writes the credentials to a temporary option file, substitutes the
/// `{credentials_file}` and `{database}` placeholders and runs the command.
/// The option file is removed once the command has finished, whatever the
/// outcome. A non-zero exit becomes `SnapshotError::Command`.
pub async fn run_with_credentials(
    runner: &dyn CommandRunner,
    connection: &ConnectionConfig,
    command: &str,
) -> Result<CommandOutput> {
    let mut credentials = NamedTempFile::new()?;
    credentials.write_all(credentials_file_contents(connection).as_bytes())?;
    credentials.flush()?;

    let command = command
        .replace("{credentials_file}", &credentials.path().to_string_lossy())
        .replace("{database}", &connection.database);

    let output = runner.run(&command).await;
    drop(credentials);
    tracing::debug!("Deleted MySQL credentials file");

    let output = output?;
    if !output.success {
        return Err(SnapshotError::Command {
            command,
            stderr: output.diagnostic(),
        });
    }
    Ok(output)
}

/// Wraps a path in single quotes for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Which flavour of mysqldump is installed. MariaDB's rejects some MySQL-only
/// flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpVariant {
    MySql,
    MariaDb,
}

const MYSQL_ONLY_FLAGS: [&str; 2] = ["--column-statistics", "--set-gtid-purged"];

impl DumpVariant {
    pub async fn detect(runner: &dyn CommandRunner, mysqldump: &str) -> DumpVariant {
        match runner.run(&format!("{} --version", mysqldump)).await {
            Ok(output) if output.stdout.contains("MariaDB") || output.stderr.contains("MariaDB") => {
                DumpVariant::MariaDb
            }
            _ => DumpVariant::MySql,
        }
    }

    /// Configured options with flags the variant does not understand removed.
    pub fn effective_options(&self, options: &str) -> String {
        options
            .split_whitespace()
            .filter(|option| {
                *self == DumpVariant::MySql
                    || !MYSQL_ONLY_FLAGS
                        .iter()
                        .any(|flag| option.split('=').next() == Some(*flag))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            host: "primary".to_string(),
            read_host: Some("replica".to_string()),
            port: 3306,
            username: "app".to_string(),
            password: "s3cret".to_string(),
            database: "appdb".to_string(),
        }
    }

    #[test]
    fn test_credentials_file_uses_read_host() {
        let contents = credentials_file_contents(&connection());
        assert!(contents.starts_with("[client]"));
        assert!(contents.contains("user = 'app'"));
        assert!(contents.contains("host = 'replica'"));
        assert!(contents.contains("port = '3306'"));
    }

    #[tokio::test]
    async fn test_run_with_credentials_substitutes_placeholders() -> anyhow::Result<()> {
        let output = run_with_credentials(
            &ShellRunner,
            &connection(),
            "grep -q \"user = 'app'\" {credentials_file} && echo {database}",
        )
        .await?;
        assert_eq!(output.stdout.trim(), "appdb");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_with_credentials_reports_failure() {
        let err = run_with_credentials(&ShellRunner, &connection(), "echo boom >&2; false")
            .await
            .expect_err("command should fail");
        match err {
            SnapshotError::Command { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_effective_options_strip_mysql_only_flags_for_mariadb() {
        let options = "--single-transaction --no-tablespaces --set-gtid-purged=OFF --column-statistics=0";
        assert_eq!(DumpVariant::MySql.effective_options(options), options);
        assert_eq!(
            DumpVariant::MariaDb.effective_options(options),
            "--single-transaction --no-tablespaces"
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b.sql"), "'/tmp/a b.sql'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
