//! Access policy resolution: tables to storage and catalog statements

use futures_util::future::join_all;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

use crate::backend::CatalogStore;
use crate::config::{DeployEnv, LocatorConfig};
use crate::error::{Error, Result};
use crate::locator::CatalogLocator;
use crate::types::*;

pub const STORAGE_READ_ACTIONS: &[&str] = &["s3:GetObject*", "s3:GetBucket*", "s3:List*", "s3:Head*"];
pub const STORAGE_WRITE_ACTIONS: &[&str] = &["s3:PutObject*", "s3:Abort*", "s3:DeleteObject*"];

pub const CATALOG_READ_ACTIONS: &[&str] = &["glue:Get*", "glue:BatchGet*"];
pub const CATALOG_WRITE_ACTIONS: &[&str] = &[
    "glue:CreateTable",
    "glue:CreatePartition",
    "glue:UpdatePartition",
    "glue:UpdateTable",
    "glue:DeleteTable",
    "glue:DeletePartition",
    "glue:BatchCreatePartition",
    "glue:BatchDeletePartition",
];

/// Object left by Hadoop-style writers to stand in for an empty directory
pub const FOLDER_MARKER_SUFFIX: &str = "_$folder$";

const STORAGE_SCHEMES: &[&str] = &["s3", "s3a", "s3n"];

fn action_set(read: &[&str], write: &[&str], level: AccessLevel) -> BTreeSet<String> {
    let mut actions: BTreeSet<String> = read.iter().map(|a| a.to_string()).collect();
    if level == AccessLevel::Write {
        actions.extend(write.iter().map(|a| a.to_string()));
    }
    actions
}

/// Object-store actions for `level`; write includes read
pub fn storage_actions(level: AccessLevel) -> BTreeSet<String> {
    action_set(STORAGE_READ_ACTIONS, STORAGE_WRITE_ACTIONS, level)
}

/// Catalog actions for `level`; write includes read
pub fn catalog_actions(level: AccessLevel) -> BTreeSet<String> {
    action_set(CATALOG_READ_ACTIONS, CATALOG_WRITE_ACTIONS, level)
}

/// A storage uri split into bucket and object key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub scheme: String,
    pub bucket: String,
    /// Key without leading or trailing `/`
    pub key: String,
}

impl StorageLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = Self::split_scheme(uri)?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::malformed_location(uri, "missing bucket"));
        }
        let key = key.trim_matches('/');
        if key.is_empty() {
            // a bucket-root table would turn into a bucket-wide grant
            return Err(Error::malformed_location(uri, "missing object path below the bucket"));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn split_scheme(uri: &str) -> Result<(&str, &str)> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::malformed_location(uri, "missing scheme"))?;
        if !STORAGE_SCHEMES.contains(&scheme) {
            return Err(Error::malformed_location(
                uri,
                format!("unsupported scheme '{}'", scheme),
            ));
        }
        Ok((scheme, rest))
    }

    /// Bucket root, folder marker and everything under the key, in that order
    pub fn resources(&self, env: &DeployEnv) -> [String; 3] {
        let root = env.s3_bucket_arn(&self.bucket);
        let marker = format!("{}/{}{}", root, self.key, FOLDER_MARKER_SUFFIX);
        let objects = format!("{}/{}/*", root, self.key);
        [root, marker, objects]
    }
}

/// `{prefix}/{database}/{table}` for a table that does not exist yet
pub fn provisioning_uri(prefix: &str, database: &str, table: &str) -> Result<String> {
    let (_, rest) = StorageLocation::split_scheme(prefix)?;
    if rest.trim_matches('/').is_empty() {
        return Err(Error::malformed_location(prefix, "missing bucket"));
    }
    Ok(format!("{}/{}/{}", prefix.trim_end_matches('/'), database, table))
}

/// Catalog statement for a request. Needs no catalog lookups.
pub fn catalog_statement(
    env: &DeployEnv,
    request: &PermissionRequest,
    level: AccessLevel,
) -> PolicyStatement {
    let base = env.glue_arn_base();
    let mut resources = vec![
        format!("{}:catalog", base),
        format!("{}:database/{}", base, request.database),
    ];
    match &request.tables {
        TableSelection::All => resources.push(format!("{}:table/{}/*", base, request.database)),
        TableSelection::Named(tables) => resources.extend(
            tables
                .iter()
                .map(|table| format!("{}:table/{}/{}*", base, request.database, table)),
        ),
    }
    PolicyStatement::new(catalog_actions(level), resources)
}

/// Resolves permission requests into storage and catalog statements
pub struct PolicyResolver<'a> {
    locator: CatalogLocator<'a>,
    env: DeployEnv,
}

impl<'a> PolicyResolver<'a> {
    pub fn new(store: &'a dyn CatalogStore, env: DeployEnv, config: LocatorConfig) -> Self {
        Self {
            locator: CatalogLocator::new(store, config),
            env,
        }
    }

    pub fn env(&self) -> &DeployEnv {
        &self.env
    }

    /// Produce exactly one storage and one catalog statement for `request`.
    ///
    /// Any table that fails (missing without a provisioning prefix, store
    /// error, malformed location) fails the whole call.
    pub async fn resolve(
        &self,
        request: &PermissionRequest,
        level: AccessLevel,
    ) -> Result<ResolvedPolicy> {
        validate(request)?;

        let tables = match &request.tables {
            TableSelection::Named(tables) => tables.clone(),
            TableSelection::All => {
                let tables = self.locator.list_tables(&request.database).await?;
                if tables.is_empty() {
                    return Err(Error::NoTablesFound {
                        database: request.database.clone(),
                    });
                }
                tables
            }
        };

        // lookups run concurrently, results stay in input order
        let outcomes = join_all(
            tables
                .iter()
                .map(|table| self.storage_uri(request, level, table)),
        )
        .await;

        let mut first_error = None;
        let mut uris = Vec::with_capacity(outcomes.len());
        for (table, outcome) in tables.iter().zip(outcomes) {
            match outcome {
                Ok(uri) => uris.push(uri),
                Err(e) => {
                    error!(database = %request.database, table = %table, error = %e, "Table failed resolution");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut resources = Vec::with_capacity(uris.len() * 3);
        for uri in &uris {
            resources.extend(StorageLocation::parse(uri)?.resources(&self.env));
        }

        let policy = ResolvedPolicy {
            storage: PolicyStatement::new(storage_actions(level), resources),
            catalog: catalog_statement(&self.env, request, level),
        };
        info!(
            database = %request.database,
            access = %level,
            tables = tables.len(),
            storage_resources = policy.storage.resources.len(),
            "Resolved access policy"
        );
        Ok(policy)
    }

    async fn storage_uri(
        &self,
        request: &PermissionRequest,
        level: AccessLevel,
        table: &str,
    ) -> Result<String> {
        let location = self
            .locator
            .locate(&TableRef::new(request.database.clone(), table))
            .await?;
        if let Some(uri) = location.storage_uri {
            // surface malformed catalog data before anything is granted
            StorageLocation::parse(&uri)?;
            return Ok(uri);
        }

        match (level, &request.provisioning_uri_prefix) {
            (AccessLevel::Write, Some(prefix)) => {
                let uri = provisioning_uri(prefix, &request.database, table)?;
                debug!(database = %request.database, table = %table, uri = %uri, "Synthesized location for new table");
                Ok(uri)
            }
            _ => Err(Error::TableNotProvisionable {
                database: request.database.clone(),
                table: table.to_string(),
            }),
        }
    }
}

fn validate(request: &PermissionRequest) -> Result<()> {
    if request.database.trim().is_empty() {
        return Err(Error::invalid_request("database name must not be empty"));
    }
    if let TableSelection::Named(tables) = &request.tables {
        if tables.is_empty() {
            return Err(Error::invalid_request(format!(
                "no tables requested for database '{}'; use \"*\" for every table",
                request.database
            )));
        }
        if tables.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::invalid_request(format!(
                "empty table name in request for database '{}'",
                request.database
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_config, test_env, MockStore};

    fn covid_store() -> MockStore {
        MockStore::new()
            .with_table("covid-19", "nytimes_counties", "s3://bucket/covid-19/nytimes_counties")
            .with_table("covid-19", "nytimes_states", "s3://bucket/covid-19/nytimes_states/")
            .with_table("covid-19", "hospital_beds", "s3://other-bucket/covid-19/hospital_beds")
    }

    #[tokio::test]
    async fn test_read_existing_table() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request = PermissionRequest::tables("covid-19", ["nytimes_counties"]);
        let policy = resolver.resolve(&request, AccessLevel::Read).await.unwrap();

        assert_eq!(
            policy.storage.resources,
            vec![
                "arn:aws:s3:::bucket",
                "arn:aws:s3:::bucket/covid-19/nytimes_counties_$folder$",
                "arn:aws:s3:::bucket/covid-19/nytimes_counties/*",
            ]
        );
        assert_eq!(policy.storage.actions, storage_actions(AccessLevel::Read));
        assert_eq!(
            policy.catalog.resources,
            vec![
                "arn:aws:glue:us-east-1:123456789012:catalog",
                "arn:aws:glue:us-east-1:123456789012:database/covid-19",
                "arn:aws:glue:us-east-1:123456789012:table/covid-19/nytimes_counties*",
            ]
        );
        assert_eq!(policy.catalog.actions, catalog_actions(AccessLevel::Read));
    }

    #[tokio::test]
    async fn test_write_missing_table_uses_provisioning_prefix() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request = PermissionRequest::tables("covid-19", ["covid_state_data"])
            .with_provisioning_prefix("s3://tmp-bucket");
        let uri = resolver
            .storage_uri(&request, AccessLevel::Write, "covid_state_data")
            .await
            .unwrap();
        assert_eq!(uri, "s3://tmp-bucket/covid-19/covid_state_data");

        let policy = resolver.resolve(&request, AccessLevel::Write).await.unwrap();
        assert_eq!(
            policy.storage.resources,
            vec![
                "arn:aws:s3:::tmp-bucket",
                "arn:aws:s3:::tmp-bucket/covid-19/covid_state_data_$folder$",
                "arn:aws:s3:::tmp-bucket/covid-19/covid_state_data/*",
            ]
        );
        let mut expected = storage_actions(AccessLevel::Read);
        expected.extend(STORAGE_WRITE_ACTIONS.iter().map(|a| a.to_string()));
        assert_eq!(policy.storage.actions, expected);
    }

    #[tokio::test]
    async fn test_missing_table_without_prefix_fails() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request = PermissionRequest::tables("covid-19", ["nytimes_counties", "covid_state_data"]);
        let err = resolver.resolve(&request, AccessLevel::Write).await.unwrap_err();
        match err {
            Error::TableNotProvisionable { database, table } => {
                assert_eq!(database, "covid-19");
                assert_eq!(table, "covid_state_data");
            }
            other => panic!("Expected TableNotProvisionable, got {:?}", other),
        }
        // the other table was still looked up
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_read_never_provisions() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request = PermissionRequest::tables("covid-19", ["covid_state_data"])
            .with_provisioning_prefix("s3://tmp-bucket");
        let err = resolver.resolve(&request, AccessLevel::Read).await.unwrap_err();
        assert!(matches!(err, Error::TableNotProvisionable { .. }));
    }

    #[tokio::test]
    async fn test_store_error_aborts_resolve() {
        let store = covid_store().with_permanent_failure("covid-19", "hospital_beds", "AccessDeniedException");
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request = PermissionRequest::tables("covid-19", ["nytimes_counties", "hospital_beds"]);
        let err = resolver.resolve(&request, AccessLevel::Read).await.unwrap_err();
        assert!(matches!(err, Error::CatalogStoreError { .. }));
    }

    #[tokio::test]
    async fn test_malformed_location_is_fatal() {
        let store = MockStore::new()
            .with_table("db", "no_scheme", "bucket/db/no_scheme")
            .with_table("db", "bucket_root", "s3://bucket/");
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        for table in ["no_scheme", "bucket_root"] {
            let err = resolver
                .resolve(&PermissionRequest::tables("db", [table]), AccessLevel::Read)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MalformedLocation { .. }), "{}", table);
        }
    }

    #[tokio::test]
    async fn test_named_tables_keep_input_order() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request =
            PermissionRequest::tables("covid-19", ["nytimes_states", "hospital_beds", "nytimes_counties"]);
        let policy = resolver.resolve(&request, AccessLevel::Read).await.unwrap();

        let tables: Vec<&String> = policy.catalog.resources[2..].iter().collect();
        assert_eq!(tables.len(), 3);
        assert!(tables[0].ends_with("table/covid-19/nytimes_states*"));
        assert!(tables[1].ends_with("table/covid-19/hospital_beds*"));
        assert!(tables[2].ends_with("table/covid-19/nytimes_counties*"));

        // shared bucket root appears once, first-seen order
        assert_eq!(
            policy.storage.resources,
            vec![
                "arn:aws:s3:::bucket",
                "arn:aws:s3:::bucket/covid-19/nytimes_states_$folder$",
                "arn:aws:s3:::bucket/covid-19/nytimes_states/*",
                "arn:aws:s3:::other-bucket",
                "arn:aws:s3:::other-bucket/covid-19/hospital_beds_$folder$",
                "arn:aws:s3:::other-bucket/covid-19/hospital_beds/*",
                "arn:aws:s3:::bucket/covid-19/nytimes_counties_$folder$",
                "arn:aws:s3:::bucket/covid-19/nytimes_counties/*",
            ]
        );
    }

    #[tokio::test]
    async fn test_wildcard_has_single_table_pattern() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let policy = resolver
            .resolve(&PermissionRequest::all_tables("covid-19"), AccessLevel::Read)
            .await
            .unwrap();

        let table_patterns: Vec<&String> = policy
            .catalog
            .resources
            .iter()
            .filter(|r| r.contains(":table/"))
            .collect();
        assert_eq!(
            table_patterns,
            vec!["arn:aws:glue:us-east-1:123456789012:table/covid-19/*"]
        );
        // storage still covers every listed table
        assert!(policy
            .storage
            .resources
            .contains(&"arn:aws:s3:::other-bucket/covid-19/hospital_beds/*".to_string()));
    }

    #[tokio::test]
    async fn test_wildcard_on_empty_database_fails() {
        let store = MockStore::new();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let err = resolver
            .resolve(&PermissionRequest::all_tables("empty"), AccessLevel::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTablesFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_table_list_is_rejected_not_widened() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request = PermissionRequest::tables("covid-19", Vec::<String>::new())
            .with_provisioning_prefix("s3://tmp-bucket");
        let err = resolver.resolve(&request, AccessLevel::Write).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let store = covid_store();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());

        let request = PermissionRequest::tables("covid-19", ["hospital_beds", "nytimes_counties"]);
        let first = resolver.resolve(&request, AccessLevel::Write).await.unwrap();
        let second = resolver.resolve(&request, AccessLevel::Write).await.unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_write_is_strict_superset_of_read() {
        let (read, write) = (storage_actions(AccessLevel::Read), storage_actions(AccessLevel::Write));
        assert!(write.is_superset(&read) && write.len() > read.len());

        let (read, write) = (catalog_actions(AccessLevel::Read), catalog_actions(AccessLevel::Write));
        assert!(write.is_superset(&read) && write.len() > read.len());
    }

    #[test]
    fn test_parse_storage_location() {
        let loc = StorageLocation::parse("s3://bucket/covid-19/nytimes_states/").unwrap();
        assert_eq!(loc.bucket, "bucket");
        assert_eq!(loc.key, "covid-19/nytimes_states");

        assert!(StorageLocation::parse("s3a://bucket/k").is_ok());
        assert!(StorageLocation::parse("gs://bucket/k").is_err());
        assert!(StorageLocation::parse("s3:///k").is_err());
    }

    #[test]
    fn test_provisioning_uri_trims_trailing_slash() {
        assert_eq!(
            provisioning_uri("s3://tmp-bucket/", "covid-19", "t").unwrap(),
            "s3://tmp-bucket/covid-19/t"
        );
        assert!(provisioning_uri("tmp-bucket", "covid-19", "t").is_err());
    }

    #[test]
    fn test_catalog_statement_for_named_tables() {
        let request = PermissionRequest::tables("db", ["a", "b"]);
        let stmt = catalog_statement(&test_env(), &request, AccessLevel::Write);
        assert_eq!(stmt.resources.len(), 4);
        assert!(stmt.actions.contains("glue:CreateTable"));
        assert!(stmt.actions.contains("glue:Get*"));
    }
}
