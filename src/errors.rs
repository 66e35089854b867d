use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("PARSE_ERROR: {0}")]
    Parse(String),
    #[error("INVALID_QUERY: {}", .0.join("; "))]
    InvalidQuery(Vec<String>),
    #[error("LOCK_TIMEOUT: {0}")]
    LockTimeout(String),
    #[error("SOURCE_FETCH: {kind}: {message}")]
    SourceFetch { kind: String, message: String },
    #[error("CACHE_LOAD: {0}")]
    CacheLoad(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn source_fetch(kind: impl ToString, message: impl ToString) -> Self {
        Self::SourceFetch {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    /// Individual problems carried by an `InvalidQuery`, or the single message otherwise.
    pub fn problems(&self) -> Vec<String> {
        match self {
            Self::InvalidQuery(problems) => problems.clone(),
            other => vec![other.to_string()],
        }
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

impl From<csv::Error> for AppError {
    fn from(value: csv::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
