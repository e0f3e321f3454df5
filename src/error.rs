use thiserror::Error;

/// Main error type for cartograph operations
#[derive(Error, Debug)]
pub enum CartographError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Repository fetch failed: {0}")]
    Fetch(String),

    #[error("Repository scan failed: {0}")]
    Scan(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("All models exhausted their quotas (attempted: {})", attempted_models.join(", "))]
    QuotaExhausted { attempted_models: Vec<String> },

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("Structured response did not match the declared shape: {0}")]
    Shape(String),

    #[error("Diagram validation failed: {0}")]
    Validation(String),

    #[error("Run {0} not found")]
    NotFound(String),

    #[error("Run {0} is not completed yet")]
    NotReady(String),
}

/// How an error propagates through the workflow runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Terminates the run with status `failed`.
    Fatal,
    /// Appended to the run's error log; the stage output stays unset.
    Degrading,
}

impl CartographError {
    /// Classify by sentinel variant, never by message content.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CartographError::Fetch(_)
            | CartographError::Scan(_)
            | CartographError::Storage(_)
            | CartographError::QuotaExhausted { .. }
            | CartographError::Io(_)
            | CartographError::Config(_) => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Degrading,
        }
    }

    /// Machine-readable reason recorded on a failed run.
    pub fn reason(&self) -> &'static str {
        match self {
            CartographError::Fetch(_) => "fetch_failed",
            CartographError::Scan(_) => "scan_failed",
            CartographError::Storage(_) => "persistence_failed",
            CartographError::QuotaExhausted { .. } => "quota_exhausted",
            CartographError::Config(_) => "config_error",
            _ => "analysis_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, CartographError>;
