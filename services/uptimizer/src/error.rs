//! Error types for the uptimizer service

/// Errors that can occur in the uptimizer service
#[derive(Debug, thiserror::Error)]
pub enum UptimizerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("History store unavailable")]
    StoreUnavailable,

    #[error("History store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("No data in last 24h")]
    NoData,

    #[error("Statistics error: {0}")]
    Stats(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// Result type alias for uptimizer operations
pub type Result<T> = std::result::Result<T, UptimizerError>;
