//! Job manifests: the declarative input that drives resolve-then-assemble

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::assembler::{BatchEnvironment, ContainerResources, JobAssembler, JobRequest, JobSpec};
use crate::error::Result;
use crate::permissions::PolicyResolver;
use crate::schedule::Schedule;
use crate::types::*;

/// One logical dataset the job touches ("source", "destination", ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetAccess {
    pub role: String,
    pub database: String,
    #[serde(default)]
    pub tables: TableSelection,
    pub access: AccessLevel,
    #[serde(default)]
    pub provisioning_prefix: Option<String>,
}

impl DatasetAccess {
    pub fn request(&self) -> PermissionRequest {
        PermissionRequest {
            database: self.database.clone(),
            tables: self.tables.clone(),
            provisioning_uri_prefix: self.provisioning_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub name: String,
    #[serde(flatten)]
    pub batch: BatchEnvironment,
    pub command: Vec<String>,
    #[serde(default)]
    pub resources: ContainerResources,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub datasets: Vec<DatasetAccess>,
}

impl JobManifest {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resolve every dataset in order, then assemble the job.
    /// Nothing is assembled if any dataset fails to resolve.
    pub async fn build(&self, resolver: &PolicyResolver<'_>) -> Result<JobSpec> {
        let mut policy_bundle = Vec::with_capacity(self.datasets.len());
        for dataset in &self.datasets {
            info!(job = %self.name, role = %dataset.role, database = %dataset.database, access = %dataset.access, "Resolving dataset");
            policy_bundle.push(resolver.resolve(&dataset.request(), dataset.access).await?);
        }

        JobAssembler::new(&self.batch, resolver.env()).assemble(JobRequest {
            name: self.name.clone(),
            command: self.command.clone(),
            policy_bundle,
            resources: self.resources,
            schedule: self.schedule.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_support::{fast_config, test_env, MockStore};

    const MANIFEST: &str = r#"{
        "name": "sample-covid-sql-athena-mat",
        "image_uri": "123456789012.dkr.ecr.us-east-1.amazonaws.com/batch-materialize-env",
        "job_queue_arn": "arn:aws:batch:us-east-1:123456789012:job-queue/materialize",
        "staging_bucket": "athena-tmp-bucket-123456789012",
        "command": ["python3", "materialize_athena_query.py", "some_project/sample-nyc-covid.sql"],
        "datasets": [
            {"role": "source", "database": "covid-19", "tables": ["nytimes_counties"], "access": "read"},
            {"role": "destination", "database": "covid-19", "tables": ["covid_state_data"],
             "access": "write", "provisioning_prefix": "s3://tmp-bucket"}
        ]
    }"#;

    #[tokio::test]
    async fn test_build_sample_job() {
        let manifest: JobManifest = serde_json::from_str(MANIFEST).unwrap();
        assert_eq!(manifest.resources, ContainerResources::default());

        let store = MockStore::new().with_table(
            "covid-19",
            "nytimes_counties",
            "s3://bucket/covid-19/nytimes_counties",
        );
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());
        let job = manifest.build(&resolver).await.unwrap();

        let role = &job.job_identity;
        assert!(role.grants("s3:GetObject*", "arn:aws:s3:::bucket/covid-19/nytimes_counties/*"));
        assert!(!role.grants("s3:PutObject*", "arn:aws:s3:::bucket/covid-19/nytimes_counties/*"));
        assert!(role.grants("s3:PutObject*", "arn:aws:s3:::tmp-bucket/covid-19/covid_state_data/*"));
        assert!(role.grants(
            "glue:CreateTable",
            "arn:aws:glue:us-east-1:123456789012:table/covid-19/covid_state_data*"
        ));
        assert!(role.grants("s3:PutObject*", "arn:aws:s3:::athena-tmp-bucket-123456789012/*"));
        assert!(job.trigger.is_none());
    }

    #[tokio::test]
    async fn test_manifest_schedule_is_normalised() {
        let mut value: serde_json::Value = serde_json::from_str(MANIFEST).unwrap();
        value["schedule"] = "0 10 * * *".into();
        let manifest: JobManifest = serde_json::from_value(value.clone()).unwrap();

        let store = MockStore::new().with_table(
            "covid-19",
            "nytimes_counties",
            "s3://bucket/covid-19/nytimes_counties",
        );
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());
        let job = manifest.build(&resolver).await.unwrap();
        assert_eq!(job.trigger.unwrap().schedule.expression(), "cron(0 10 * * ? *)");

        value["schedule"] = "every tuesday please".into();
        assert!(serde_json::from_value::<JobManifest>(value).is_err());
    }

    #[test]
    fn test_explicit_empty_table_list_is_not_a_wildcard() {
        let mut value: serde_json::Value = serde_json::from_str(MANIFEST).unwrap();
        value["datasets"][0]["tables"] = serde_json::json!([]);
        let manifest: JobManifest = serde_json::from_value(value).unwrap();
        assert!(!manifest.datasets[0].tables.is_all());
    }

    #[tokio::test]
    async fn test_failed_dataset_assembles_nothing() {
        let mut manifest: JobManifest = serde_json::from_str(MANIFEST).unwrap();
        manifest.datasets[1].provisioning_prefix = None;

        let store = MockStore::new();
        let resolver = PolicyResolver::new(&store, test_env(), fast_config());
        let err = manifest.build(&resolver).await.unwrap_err();
        assert!(matches!(err, Error::TableNotProvisionable { .. }));
    }
}
