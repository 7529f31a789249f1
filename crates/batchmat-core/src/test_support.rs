//! In-memory catalog store used by unit tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::backend::{CatalogLookup, CatalogStore, StoreError};
use crate::config::{DeployEnv, LocatorConfig};
use crate::retry::RetryConfig;

#[derive(Default)]
pub struct MockStore {
    tables: BTreeMap<String, BTreeMap<String, String>>,
    permanent: HashMap<(String, String), String>,
    transient_failures: AtomicU32,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, database: &str, table: &str, location: &str) -> Self {
        self.tables
            .entry(database.to_string())
            .or_default()
            .insert(table.to_string(), location.to_string());
        self
    }

    /// The next `n` calls fail with a transient error
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_permanent_failure(mut self, database: &str, table: &str, message: &str) -> Self {
        self.permanent
            .insert((database.to_string(), table.to_string()), message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::transient("ThrottlingException"));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MockStore {
    async fn get_table_location(
        &self,
        database: &str,
        table: &str,
    ) -> Result<CatalogLookup, StoreError> {
        self.before_call().await?;
        if let Some(message) = self.permanent.get(&(database.to_string(), table.to_string())) {
            return Err(StoreError::permanent(message.clone()));
        }
        Ok(self
            .tables
            .get(database)
            .and_then(|tables| tables.get(table))
            .map(|location| CatalogLookup::Found {
                location: location.clone(),
            })
            .unwrap_or(CatalogLookup::NotFound))
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, StoreError> {
        self.before_call().await?;
        Ok(self
            .tables
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default())
    }
}

pub fn fast_config() -> LocatorConfig {
    LocatorConfig {
        timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        },
    }
}

pub fn test_env() -> DeployEnv {
    DeployEnv::new("123456789012", "us-east-1").unwrap()
}
