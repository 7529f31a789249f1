//! Catalog store trait and backend selection

use async_trait::async_trait;
use std::fmt;

/// Result of looking a table up in the catalog store.
///
/// A missing table is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLookup {
    Found { location: String },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Throttling, timeouts, dispatch failures. Worth retrying.
    Transient,
    /// Access denied, missing database, malformed response.
    Permanent,
}

/// Failure reaching or reading the catalog store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StoreErrorKind::Transient => write!(f, "transient: {}", self.message),
            StoreErrorKind::Permanent => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read access to the catalog metadata store.
/// Implemented by the Glue client and the local emulator.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Storage location of `database.table`
    async fn get_table_location(
        &self,
        database: &str,
        table: &str,
    ) -> Result<CatalogLookup, StoreError>;

    /// Names of all tables in `database`
    async fn list_tables(&self, database: &str) -> Result<Vec<String>, StoreError>;
}

/// Which catalog store to talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Local emulator (no AWS required)
    Emulator {
        /// Optional file to persist state
        state_file: Option<String>,
    },
    /// AWS Glue Data Catalog
    Aws {
        region: Option<String>,
        profile: Option<String>,
        /// Custom endpoint (LocalStack and friends)
        endpoint: Option<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Emulator { state_file: None }
    }
}
