//! # AWS Glue Backend
//!
//! Catalog store backed by the AWS Glue Data Catalog.

use anyhow::Result;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_glue::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_glue::Client;
use batchmat_core::{CatalogLookup, CatalogStore, StoreError};
use tracing::{debug, info};

/// How a Glue error code should be treated by the locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Transient,
    Permanent,
}

/// Classify a Glue service error code
pub fn classify_error_code(code: Option<&str>) -> ErrorClass {
    match code {
        Some("EntityNotFoundException") => ErrorClass::NotFound,
        Some(
            "ThrottlingException"
            | "Throttling"
            | "TooManyRequestsException"
            | "InternalServiceException"
            | "OperationTimeoutException"
            | "ServiceUnavailableException",
        ) => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

fn classify<E, R>(err: &SdkError<E, R>) -> ErrorClass
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ErrorClass::Transient
        }
        SdkError::ServiceError(ctx) => classify_error_code(ctx.err().code()),
        _ => ErrorClass::Permanent,
    }
}

fn store_error(class: ErrorClass, message: String) -> StoreError {
    match class {
        ErrorClass::Transient => StoreError::transient(message),
        ErrorClass::NotFound | ErrorClass::Permanent => StoreError::permanent(message),
    }
}

/// Glue Data Catalog store
pub struct GlueCatalogStore {
    client: Client,
}

impl GlueCatalogStore {
    /// Create a store; unset options fall back to the default provider chain
    pub async fn with_config(
        region: Option<String>,
        profile: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self> {
        // The locator owns the retry budget
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(aws_config::retry::RetryConfig::disabled());

        if let Some(region) = &region {
            loader = loader.region(Region::new(region.clone()));
        }

        if let Some(profile) = profile {
            loader = loader.profile_name(&profile);
        }

        let sdk_config = loader.load().await;

        let mut glue_config = aws_sdk_glue::config::Builder::from(&sdk_config);
        // LocalStack and friends
        if let Some(endpoint) = endpoint {
            glue_config = glue_config.endpoint_url(endpoint);
        }

        let client = Client::from_conf(glue_config.build());

        info!(region = ?sdk_config.region(), "Using Glue Data Catalog");

        Ok(Self { client })
    }
}

#[async_trait]
impl CatalogStore for GlueCatalogStore {
    async fn get_table_location(
        &self,
        database: &str,
        table: &str,
    ) -> Result<CatalogLookup, StoreError> {
        let output = match self
            .client
            .get_table()
            .database_name(database)
            .name(table)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let class = classify(&err);
                if class == ErrorClass::NotFound {
                    debug!(database, table, "Glue reports table not found");
                    return Ok(CatalogLookup::NotFound);
                }
                return Err(store_error(
                    class,
                    format!("GetTable {}.{}: {}", database, table, DisplayErrorContext(&err)),
                ));
            }
        };

        let location = output
            .table()
            .and_then(|t| t.storage_descriptor())
            .and_then(|sd| sd.location())
            .filter(|location| !location.is_empty())
            .ok_or_else(|| {
                StoreError::permanent(format!(
                    "Table {}.{} has no storage location",
                    database, table
                ))
            })?;

        Ok(CatalogLookup::Found {
            location: location.to_string(),
        })
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, StoreError> {
        let mut pages = self
            .client
            .get_tables()
            .database_name(database)
            .into_paginator()
            .send();

        let mut names = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| {
                store_error(
                    classify(&err),
                    format!("GetTables {}: {}", database, DisplayErrorContext(&err)),
                )
            })?;
            names.extend(page.table_list().iter().map(|t| t.name().to_string()));
        }
        debug!(database, tables = names.len(), "Listed Glue tables");
        Ok(names)
    }
}
