//! Error types for civicgate
//!
//! The taxonomy separates degradable dependency failures (`Unavailable`,
//! recovered locally and logged) from correctness-critical failures
//! (`Database`, propagated to the caller) and from expected outcomes
//! (`RateLimited`, normal control flow carrying a retry delay).

/// Main error type for civicgate operations
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GateError {
    /// Whether this error should degrade locally instead of propagating
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// User-visible message for rate limited requests
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { retry_after_secs } => {
                format!("Too many requests. Try again in {} seconds.", retry_after_secs)
            }
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for GateError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for civicgate operations
pub type Result<T> = std::result::Result<T, GateError>;
