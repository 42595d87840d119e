use lumen_logging::LogError;
use lumen_notify::NotifyError;
use thiserror::Error;

/// Lumen Core 统一错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown report section: {0}")]
    UnknownReportSection(String),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Config(err.to_string())
    }
}
