use thiserror::Error;

pub type Result<T> = std::result::Result<T, PharmaOpsError>;

#[derive(Error, Debug)]
pub enum PharmaOpsError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upstream HTTP error: status={status}, body={body_excerpt}")]
    UpstreamClient { status: u16, body_excerpt: String },

    #[error("Upstream protocol error: code={code}, message={message}")]
    UpstreamProtocol { code: i64, message: String },

    #[error("Rate limited by upstream, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Browser harvest failed: {reason}")]
    BrowserHarvest { reason: String },

    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Drug not found: {0}")]
    DrugNotFound(i64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PharmaOpsError {
    pub fn auth<S: Into<String>>(msg: S) -> Self {
        PharmaOpsError::Auth(msg.into())
    }

    pub fn browser<S: Into<String>>(reason: S) -> Self {
        PharmaOpsError::BrowserHarvest {
            reason: reason.into(),
        }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        PharmaOpsError::Config(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        PharmaOpsError::Validation(msg.into())
    }

    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        PharmaOpsError::Persistence(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PharmaOpsError::Internal(msg.into())
    }

    /// Whether a retry loop may attempt this operation again.
    ///
    /// Network blips, upstream 5xx and browser failures are transient;
    /// auth failures, client errors and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PharmaOpsError::Network(_) => true,
            PharmaOpsError::UpstreamClient { status, .. } => *status >= 500,
            PharmaOpsError::RateLimited { .. } => true,
            PharmaOpsError::BrowserHarvest { .. } => true,
            _ => false,
        }
    }
}
