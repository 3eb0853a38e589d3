use serde::Serialize;

use crate::utils::reporter::Reporter;
use crate::utils::statements::StatementExecutor;

/// Where a post-load statement was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementScope {
    Global,
    Plan,
    PlanGroup,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementResult {
    pub statement: String,
    pub scope: StatementScope,
    pub success: bool,
    pub error: Option<String>,
}

/// Executes each statement in order on `connection`, recording every outcome.
pub async fn run_statements(
    executor: &dyn StatementExecutor,
    connection: &str,
    statements: &[String],
    scope: StatementScope,
    reporter: &dyn Reporter,
) -> Vec<StatementResult> {
    let mut results = Vec::with_capacity(statements.len());
    for statement in statements {
        reporter.notify(&format!("Running: {}", statement));
        let result = executor.execute(connection, statement).await;
        if let Err(e) = &result {
            tracing::warn!("Post-load statement failed on {}: {}: {}", connection, statement, e);
        }
        results.push(StatementResult {
            statement: statement.clone(),
            scope,
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        });
    }
    results
}
