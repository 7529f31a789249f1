//! Error types for policy resolution and job assembly

use thiserror::Error;

/// Main error type for batchmat operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Table is absent from the catalog and no provisioning prefix was given
    #[error(
        "table '{table}' was not found in database '{database}' and no provisioning prefix was \
         supplied; create the table first or pass the storage prefix it will be written under"
    )]
    TableNotProvisionable { database: String, table: String },

    /// Transient store failures persisted past the retry budget
    #[error("catalog store unavailable while locating {database}.{table} after {attempts} attempt(s): {message}")]
    CatalogStoreUnavailable {
        database: String,
        table: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable store failure (permission denied, malformed response, ...)
    #[error("catalog store error while locating {database}.{table}: {message}")]
    CatalogStoreError {
        database: String,
        table: String,
        message: String,
    },

    /// Storage location could not be split into bucket and key
    #[error("malformed storage location '{location}': {reason}")]
    MalformedLocation { location: String, reason: String },

    /// Wildcard request against a database without tables
    #[error("database '{database}' has no tables to grant storage access on")]
    NoTablesFound { database: String },

    /// Wrong number or shape of command-line arguments
    #[error("{message}\nusage: {usage}")]
    InvocationArgument { message: String, usage: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid job definition: {0}")]
    InvalidJob(String),

    #[error("invalid schedule expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Downstream query execution failed
    #[error("query execution failed for {target}: {source}")]
    QueryExecution {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn malformed_location(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedLocation {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn invalid_schedule(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
