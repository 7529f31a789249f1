//! Explicit configuration threaded through resolution and assembly

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

pub const ACCOUNT_ENV: &str = "CDK_DEFAULT_ACCOUNT";
pub const REGION_ENV: &str = "CDK_DEFAULT_REGION";
pub const FALLBACK_REGION_ENV: &str = "AWS_REGION";
pub const DEFAULT_PARTITION: &str = "aws";

/// Deployment target. Treated as constant for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEnv {
    pub account_id: String,
    pub region: String,
    #[serde(default = "default_partition")]
    pub partition: String,
}

fn default_partition() -> String {
    DEFAULT_PARTITION.to_string()
}

impl DeployEnv {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Result<Self> {
        let env = Self {
            account_id: account_id.into(),
            region: region.into(),
            partition: default_partition(),
        };
        env.validate()?;
        Ok(env)
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Read account and region from the deployment environment
    pub fn from_env() -> Result<Self> {
        let account_id = std::env::var(ACCOUNT_ENV)
            .map_err(|_| Error::config(format!("{} is not set", ACCOUNT_ENV)))?;
        let region = std::env::var(REGION_ENV)
            .or_else(|_| std::env::var(FALLBACK_REGION_ENV))
            .map_err(|_| {
                Error::config(format!(
                    "neither {} nor {} is set",
                    REGION_ENV, FALLBACK_REGION_ENV
                ))
            })?;
        Self::new(account_id, region)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(Error::config("account id must not be empty"));
        }
        if !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::config(format!(
                "account id '{}' must be numeric",
                self.account_id
            )));
        }
        if self.region.trim().is_empty() {
            return Err(Error::config("region must not be empty"));
        }
        if self.partition.trim().is_empty() {
            return Err(Error::config("partition must not be empty"));
        }
        Ok(())
    }

    /// `arn:{partition}:glue:{region}:{account}`
    pub fn glue_arn_base(&self) -> String {
        format!("arn:{}:glue:{}:{}", self.partition, self.region, self.account_id)
    }

    /// `arn:{partition}:s3:::{bucket}`
    pub fn s3_bucket_arn(&self, bucket: &str) -> String {
        format!("arn:{}:s3:::{}", self.partition, bucket)
    }
}

/// Bounds on a single catalog lookup
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorConfig {
    /// Per-attempt timeout for one store call
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}
