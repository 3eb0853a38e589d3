use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Command failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Statement failed: {0}")]
    Statement(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SnapshotError {
    pub fn config(message: impl Into<String>) -> Self {
        SnapshotError::Config(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        SnapshotError::Storage(message.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, SnapshotError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
