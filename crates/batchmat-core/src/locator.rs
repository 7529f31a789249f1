//! Catalog locator: table name to storage location

use tracing::{debug, info};

use crate::backend::{CatalogLookup, CatalogStore, StoreError};
use crate::config::LocatorConfig;
use crate::error::{Error, Result};
use crate::retry::retry_with_backoff;
use crate::types::{ResolvedLocation, TableRef};

/// Looks tables up in a catalog store with a bounded timeout and retry budget.
pub struct CatalogLocator<'a> {
    store: &'a dyn CatalogStore,
    config: LocatorConfig,
}

impl<'a> CatalogLocator<'a> {
    pub fn new(store: &'a dyn CatalogStore, config: LocatorConfig) -> Self {
        Self { store, config }
    }

    /// Locate one table. Not-found is `Ok` with `existed == false`.
    pub async fn locate(&self, table: &TableRef) -> Result<ResolvedLocation> {
        if table.database.is_empty() || table.name.is_empty() {
            return Err(Error::invalid_request(format!(
                "database and table names must be non-empty (got '{}')",
                table
            )));
        }

        let operation = format!("get_table_location {}", table);
        let (database, name) = (table.database.as_str(), table.name.as_str());
        let lookup = retry_with_backoff(
            &self.config.retry,
            &operation,
            StoreError::is_transient,
            move || self.lookup_once(database, name),
        )
        .await
        .map_err(|(e, attempts)| store_failure(table, e, attempts))?;

        match lookup {
            CatalogLookup::Found { location } => {
                info!(database = %table.database, table = %table.name, location = %location, "Found storage location");
                Ok(ResolvedLocation::found(table.clone(), location))
            }
            CatalogLookup::NotFound => {
                debug!(database = %table.database, table = %table.name, "Table not found in catalog");
                Ok(ResolvedLocation::missing(table.clone()))
            }
        }
    }

    /// List the tables of a database, with the same retry policy as `locate`
    pub async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let operation = format!("list_tables {}", database);
        let (store, timeout) = (self.store, self.config.timeout);
        retry_with_backoff(
            &self.config.retry,
            &operation,
            StoreError::is_transient,
            move || async move {
                match tokio::time::timeout(timeout, store.list_tables(database)).await {
                    Ok(result) => result,
                    Err(_) => Err(timed_out(timeout)),
                }
            },
        )
        .await
        .map_err(|(e, attempts)| store_failure(&TableRef::new(database, "*"), e, attempts))
    }

    async fn lookup_once(
        &self,
        database: &str,
        table: &str,
    ) -> std::result::Result<CatalogLookup, StoreError> {
        match tokio::time::timeout(
            self.config.timeout,
            self.store.get_table_location(database, table),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(timed_out(self.config.timeout)),
        }
    }
}

fn timed_out(timeout: std::time::Duration) -> StoreError {
    StoreError::transient(format!("store call timed out after {}ms", timeout.as_millis()))
}

fn store_failure(table: &TableRef, error: StoreError, attempts: u32) -> Error {
    if error.is_transient() {
        Error::CatalogStoreUnavailable {
            database: table.database.clone(),
            table: table.name.clone(),
            attempts,
            message: error.message,
        }
    } else {
        Error::CatalogStoreError {
            database: table.database.clone(),
            table: table.name.clone(),
            message: error.message,
        }
    }
}
