use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("INVALID_RANGE: {0}")]
    InvalidRange(String),
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),
    #[error("WORKER_UNAVAILABLE: {0}")]
    WorkerUnavailable(String),
    #[error("WORKER_FAILED: {kind}: {message}")]
    Worker { kind: String, message: String },
    #[error("TIMEOUT: {0}")]
    Timeout(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_worker_unavailable(&self) -> bool {
        matches!(self, Self::WorkerUnavailable(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Store(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
