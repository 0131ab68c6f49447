//! Error types for dbdoctor

use thiserror::Error;

/// Result type alias for dbdoctor operations
pub type DoctorResult<T> = Result<T, DoctorError>;

/// Error types raised below the public entry points.
///
/// These never reach a caller of [`crate::Diagnoser::diagnose`]: the executor folds them into a
/// per-statement [`crate::QueryResult`] and the diagnoser folds anything else into a failed
/// [`crate::DiagnosisReport`].
#[derive(Debug, Error)]
pub enum DoctorError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Database error reported by the server
    #[error("Database error [{code}]: {message}")]
    Database { code: String, message: String },

    /// Column decode error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Analysis backend error
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Invalid configuration, such as an unparsable database URL
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected failure in the diagnosis pipeline
    #[error("Diagnosis pipeline failed: {0}")]
    Orchestration(String),
}

impl DoctorError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create an analysis error
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis(message.into())
    }

    /// Create an orchestration error
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }

    /// Reject a database URL or connection string that cannot be parsed
    pub fn invalid_database_url(err: tokio_postgres::Error) -> Self {
        Self::Config(format!("invalid database URL: {err}"))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Parse a tokio_postgres error, keeping the server's SQLSTATE and message when present.
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            return Self::Database {
                code: db_err.code().code().to_string(),
                message: db_err.message().to_string(),
            };
        }
        if err.is_closed() {
            return Self::Connection(err.to_string());
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for DoctorError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => Self::from_db_error(e),
            other => Self::Pool(other.to_string()),
        }
    }
}

#[cfg(feature = "openai")]
impl From<reqwest::Error> for DoctorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Analysis(err.to_string())
    }
}
