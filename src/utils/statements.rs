// dbsnapshots/src/utils/statements.rs
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{Executor, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::ConnectionConfig;
use crate::errors::{Result, SnapshotError};

/// Executes SQL against a named database connection.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, connection: &str, statement: &str) -> Result<()>;

    /// Drops every table and view of the connection's database.
    async fn drop_all_tables(&self, connection: &str) -> Result<()>;
}

/// `StatementExecutor` over sqlx, one single-connection pool per connection
/// name, created on first use.
pub struct MySqlExecutor {
    connections: HashMap<String, ConnectionConfig>,
    pools: Mutex<HashMap<String, MySqlPool>>,
}

impl MySqlExecutor {
    pub fn new(connections: HashMap<String, ConnectionConfig>) -> Self {
        MySqlExecutor {
            connections,
            pools: Mutex::new(HashMap::new()),
        }
    }

    async fn pool(&self, connection: &str) -> Result<MySqlPool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(connection) {
            return Ok(pool.clone());
        }

        let config = self.connections.get(connection).ok_or_else(|| {
            SnapshotError::config(format!("A database connection for name {} does not exist", connection))
        })?;
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(&config.url()?)
            .await?;
        tracing::debug!("Connected to database '{}' on {}", config.database, config.host);
        pools.insert(connection.to_string(), pool.clone());
        Ok(pool)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[async_trait]
impl StatementExecutor for MySqlExecutor {
    async fn execute(&self, connection: &str, statement: &str) -> Result<()> {
        let pool = self.pool(connection).await?;
        // Plain &str goes over the text protocol, so statements that cannot be
        // prepared (SET GLOBAL, ANALYZE, ...) work too.
        pool.execute(statement)
            .await
            .map_err(|e| SnapshotError::Statement(e.to_string()))?;
        Ok(())
    }

    async fn drop_all_tables(&self, connection: &str) -> Result<()> {
        let pool = self.pool(connection).await?;
        let mut conn = pool.acquire().await?;

        let rows = sqlx::query(
            "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, CAST(TABLE_TYPE AS CHAR) AS table_type
             FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE()",
        )
        .fetch_all(&mut *conn)
        .await?;

        (&mut *conn).execute("SET FOREIGN_KEY_CHECKS = 0").await?;
        let mut dropped = 0;
        for row in &rows {
            let name: String = row.try_get("table_name")?;
            let kind: String = row.try_get("table_type")?;
            let statement = if kind.eq_ignore_ascii_case("VIEW") {
                format!("DROP VIEW IF EXISTS {}", quote_identifier(&name))
            } else {
                format!("DROP TABLE IF EXISTS {}", quote_identifier(&name))
            };
            if let Err(e) = (&mut *conn).execute(statement.as_str()).await {
                (&mut *conn).execute("SET FOREIGN_KEY_CHECKS = 1").await?;
                return Err(SnapshotError::Statement(format!("{}: {}", statement, e)));
            }
            dropped += 1;
        }
        (&mut *conn).execute("SET FOREIGN_KEY_CHECKS = 1").await?;

        tracing::info!("Dropped {} tables on connection {}", dropped, connection);
        Ok(())
    }
}
