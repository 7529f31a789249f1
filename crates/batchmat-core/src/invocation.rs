//! Materialization invocation surface.
//!
//! A job container is started with six positional arguments describing which
//! SQL template to run and where its result lands. The query engine itself is
//! external; this module validates the arguments, derives the output locations
//! and makes sure engine failures reach the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

use crate::error::{Error, Result};

pub const MATERIALIZE_USAGE: &str = "materialize <sql_query_path> <target_bucket> <target_database> \
     <target_table> <table_description> <stg_athena_bucket>";

const EXPECTED_ARGS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    Overwrite,
    OverwritePartitions,
}

/// One query materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeRequest {
    /// Template path relative to the SQL jobs directory
    pub sql_query_path: String,
    pub target_bucket: String,
    pub target_database: String,
    pub target_table: String,
    pub table_description: String,
    /// Bucket for query engine intermediates
    pub staging_bucket: String,
    #[serde(default)]
    pub partition_cols: Vec<String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
}

impl MaterializeRequest {
    /// Build from positional arguments (program name excluded)
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        if args.len() != EXPECTED_ARGS {
            return Err(Error::InvocationArgument {
                message: format!(
                    "expected {} arguments, got {}",
                    EXPECTED_ARGS,
                    args.len()
                ),
                usage: MATERIALIZE_USAGE.to_string(),
            });
        }
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        // description may legitimately be empty
        let required = [
            (0, "sql_query_path"),
            (1, "target_bucket"),
            (2, "target_database"),
            (3, "target_table"),
            (5, "stg_athena_bucket"),
        ];
        for (idx, name) in required {
            if args[idx].trim().is_empty() {
                return Err(Error::InvocationArgument {
                    message: format!("argument <{}> must not be empty", name),
                    usage: MATERIALIZE_USAGE.to_string(),
                });
            }
        }

        Ok(Self {
            sql_query_path: args[0].to_string(),
            target_bucket: args[1].to_string(),
            target_database: args[2].to_string(),
            target_table: args[3].to_string(),
            table_description: args[4].to_string(),
            staging_bucket: args[5].to_string(),
            partition_cols: Vec::new(),
            query_params: BTreeMap::new(),
        })
    }

    pub fn with_partition_cols(mut self, cols: Vec<String>) -> Self {
        self.partition_cols = cols;
        self
    }

    pub fn save_mode(&self) -> SaveMode {
        if self.partition_cols.is_empty() {
            SaveMode::Overwrite
        } else {
            SaveMode::OverwritePartitions
        }
    }

    /// Where the materialized dataset is written
    pub fn output_location(&self) -> String {
        format!(
            "s3://{}/{}/{}",
            self.target_bucket, self.target_database, self.target_table
        )
    }

    /// Where the query engine keeps its intermediate results
    pub fn staging_output(&self) -> String {
        format!("s3://{}/{}", self.staging_bucket, self.target_table)
    }

    /// Run through `engine`. Failures are logged with context and returned.
    pub async fn process(&self, engine: &dyn QueryEngine) -> Result<QueryOutcome> {
        info!(
            sql_query_path = %self.sql_query_path,
            target = %self.output_location(),
            staging = %self.staging_output(),
            save_mode = ?self.save_mode(),
            partition_cols = ?self.partition_cols,
            "Materialize query request"
        );

        match engine.materialize(self).await {
            Ok(outcome) => {
                info!(target = %self.output_location(), rows = ?outcome.rows_written, "Materialized query");
                Ok(outcome)
            }
            Err(source) => {
                error!(
                    sql_query_path = %self.sql_query_path,
                    target = %self.output_location(),
                    error = %source,
                    "Query materialization failed"
                );
                Err(Error::QueryExecution {
                    target: self.output_location(),
                    source,
                })
            }
        }
    }
}

/// Result reported by the query engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub rows_written: Option<u64>,
    pub output_paths: Vec<String>,
}

/// Templated-query execution engine (external collaborator)
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn materialize(&self, request: &MaterializeRequest) -> anyhow::Result<QueryOutcome>;
}
