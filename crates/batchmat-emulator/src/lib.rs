//! # Catalog Emulator
//!
//! In-memory catalog store with optional JSON persistence.
//! Lets the policy resolver and job synthesis run without AWS.

use anyhow::{bail, Result};
use async_trait::async_trait;
use batchmat_core::{CatalogLookup, CatalogStore, StoreError, TableRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

pub mod storage;

pub use storage::{FileStorage, StateExporter};

/// A registered table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Storage location (`s3://bucket/key`)
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Complete state of the catalog emulator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorState {
    /// database -> table -> entry
    #[serde(default)]
    pub databases: BTreeMap<String, BTreeMap<String, TableEntry>>,
    /// Databases whose lookups fail with an access-denied error
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub denied_databases: BTreeSet<String>,
}

impl EmulatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_count(&self) -> usize {
        self.databases.values().map(BTreeMap::len).sum()
    }

    pub fn get(&self, database: &str, table: &str) -> Option<&TableEntry> {
        self.databases.get(database).and_then(|tables| tables.get(table))
    }
}

/// Catalog store backed by [`EmulatorState`]
pub struct EmulatorCatalog {
    state: EmulatorState,
    storage: Option<FileStorage>,
    transient_failures: AtomicU32,
}

impl EmulatorCatalog {
    /// Create an emulator, loading `state_file` if it exists
    pub async fn new(state_file: Option<String>) -> Result<Self> {
        let storage = state_file.map(FileStorage::new);
        let state = match &storage {
            Some(storage) if storage.exists() => {
                let state = storage.load().await?;
                info!(path = %storage.path(), tables = state.table_count(), "Loaded catalog state");
                state
            }
            _ => EmulatorState::new(),
        };

        Ok(Self {
            state,
            storage,
            transient_failures: AtomicU32::new(0),
        })
    }

    /// In-memory emulator seeded with `state`
    pub fn from_state(state: EmulatorState) -> Self {
        Self {
            state,
            storage: None,
            transient_failures: AtomicU32::new(0),
        }
    }

    /// The next `n` store calls fail with a throttling error
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn state(&self) -> &EmulatorState {
        &self.state
    }

    /// Register (or replace) a table and persist
    pub async fn register_table(
        &mut self,
        table: &TableRef,
        location: &str,
        description: Option<String>,
    ) -> Result<()> {
        if table.database.is_empty() || table.name.is_empty() || table.name == batchmat_core::ALL_TABLES {
            bail!("Cannot register '{}': expected database.table", table);
        }
        if !location.contains("://") {
            bail!("Location '{}' has no URI scheme", location);
        }

        let previous = self
            .state
            .databases
            .entry(table.database.clone())
            .or_default()
            .insert(
                table.name.clone(),
                TableEntry {
                    location: location.to_string(),
                    description,
                },
            );
        if previous.is_some() {
            info!(table = %table, location, "Replaced table registration");
        } else {
            info!(table = %table, location, "Registered table");
        }
        self.save_state().await
    }

    /// Drop a table and persist. Returns whether it existed.
    /// The database stays registered even when its last table goes.
    pub async fn drop_table(&mut self, table: &TableRef) -> Result<bool> {
        let removed = self
            .state
            .databases
            .get_mut(&table.database)
            .map_or(false, |tables| tables.remove(&table.name).is_some());
        if removed {
            info!(table = %table, "Dropped table");
            self.save_state().await?;
        } else {
            warn!(table = %table, "Table not registered, nothing to drop");
        }
        Ok(removed)
    }

    /// Make every lookup in `database` fail permanently
    pub async fn deny_database(&mut self, database: &str) -> Result<()> {
        self.state.denied_databases.insert(database.to_string());
        self.save_state().await
    }

    async fn save_state(&self) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.save(&self.state).await?;
            debug!(path = %storage.path(), "Saved catalog state");
        }
        Ok(())
    }

    fn before_call(&self, database: &str) -> Result<(), StoreError> {
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::transient("ThrottlingException: Rate exceeded"));
        }
        if self.state.denied_databases.contains(database) {
            return Err(StoreError::permanent(format!(
                "AccessDeniedException: not authorized on database {}",
                database
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for EmulatorCatalog {
    async fn get_table_location(
        &self,
        database: &str,
        table: &str,
    ) -> Result<CatalogLookup, StoreError> {
        self.before_call(database)?;
        Ok(match self.state.get(database, table) {
            Some(entry) => CatalogLookup::Found {
                location: entry.location.clone(),
            },
            None => CatalogLookup::NotFound,
        })
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, StoreError> {
        self.before_call(database)?;
        match self.state.databases.get(database) {
            Some(tables) => Ok(tables.keys().cloned().collect()),
            None => Err(StoreError::permanent(format!(
                "EntityNotFoundException: database {} not found",
                database
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn counties() -> TableRef {
        TableRef::new("covid-19", "nytimes_counties")
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut catalog = EmulatorCatalog::new(None).await.unwrap();
        catalog
            .register_table(&counties(), "s3://bucket/covid-19/nytimes_counties", None)
            .await
            .unwrap();

        let found = catalog
            .get_table_location("covid-19", "nytimes_counties")
            .await
            .unwrap();
        assert_eq!(
            found,
            CatalogLookup::Found {
                location: "s3://bucket/covid-19/nytimes_counties".to_string()
            }
        );
        let missing = catalog
            .get_table_location("covid-19", "covid_state_data")
            .await
            .unwrap();
        assert_eq!(missing, CatalogLookup::NotFound);
    }

    #[tokio::test]
    async fn test_rejects_bad_registrations() {
        let mut catalog = EmulatorCatalog::new(None).await.unwrap();
        assert!(catalog
            .register_table(&TableRef::new("covid-19", "*"), "s3://b/k", None)
            .await
            .is_err());
        assert!(catalog
            .register_table(&counties(), "bucket/covid-19", None)
            .await
            .is_err());
        assert_eq!(catalog.state().table_count(), 0);
    }

    #[tokio::test]
    async fn test_state_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json").to_string_lossy().to_string();

        let mut catalog = EmulatorCatalog::new(Some(path.clone())).await.unwrap();
        catalog
            .register_table(
                &counties(),
                "s3://bucket/covid-19/nytimes_counties",
                Some("NYT county data".to_string()),
            )
            .await
            .unwrap();
        drop(catalog);

        let mut reloaded = EmulatorCatalog::new(Some(path.clone())).await.unwrap();
        let entry = reloaded.state().get("covid-19", "nytimes_counties").unwrap();
        assert_eq!(entry.description.as_deref(), Some("NYT county data"));

        assert!(reloaded.drop_table(&counties()).await.unwrap());
        assert!(!reloaded.drop_table(&counties()).await.unwrap());

        let emptied = EmulatorCatalog::new(Some(path)).await.unwrap();
        assert_eq!(emptied.state().table_count(), 0);
        assert!(emptied.list_tables("covid-19").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_tables() {
        let mut catalog = EmulatorCatalog::new(None).await.unwrap();
        catalog
            .register_table(&TableRef::new("covid-19", "b"), "s3://bucket/b", None)
            .await
            .unwrap();
        catalog
            .register_table(&TableRef::new("covid-19", "a"), "s3://bucket/a", None)
            .await
            .unwrap();

        assert_eq!(catalog.list_tables("covid-19").await.unwrap(), vec!["a", "b"]);
        let err = catalog.list_tables("sales").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let mut catalog = EmulatorCatalog::new(None).await.unwrap().with_transient_failures(2);
        catalog.deny_database("restricted").await.unwrap();

        for _ in 0..2 {
            let err = catalog.get_table_location("covid-19", "t").await.unwrap_err();
            assert!(err.is_transient());
        }
        assert_eq!(
            catalog.get_table_location("covid-19", "t").await.unwrap(),
            CatalogLookup::NotFound
        );

        let err = catalog.get_table_location("restricted", "t").await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message.contains("AccessDenied"));
    }
}
