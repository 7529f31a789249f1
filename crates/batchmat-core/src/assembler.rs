//! Job definition assembly: identities, container spec and schedule binding

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::DeployEnv;
use crate::error::{Error, Result};
use crate::permissions::storage_actions;
use crate::schedule::Schedule;
use crate::types::*;

pub const TASK_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
pub const TASK_EXECUTION_MANAGED_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";
pub const LOG_ACTIONS: &[&str] = &[
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
    "logs:DescribeLogStreams",
];
pub const FARGATE_PLATFORM_VERSION: &str = "1.4.0";

/// A role assumed by the container service, with its inline statements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub assumed_by: String,
    pub description: String,
    pub managed_policies: Vec<String>,
    pub statements: Vec<PolicyStatement>,
}

impl Identity {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assumed_by: TASK_PRINCIPAL.to_string(),
            description: description.into(),
            managed_policies: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn grants(&self, action: &str, resource: &str) -> bool {
        self.statements.iter().any(|s| s.grants(action, resource))
    }

    /// Attach `statement`, skipping every action+resource pair already granted.
    ///
    /// Remaining pairs are grouped back into statements by identical action
    /// sets, in resource order. Returns the number of statements added.
    pub fn attach(&mut self, statement: &PolicyStatement) -> usize {
        let mut groups: Vec<(BTreeSet<String>, Vec<String>)> = Vec::new();
        for resource in &statement.resources {
            let missing: BTreeSet<String> = statement
                .actions
                .iter()
                .filter(|action| !self.grants(action, resource))
                .cloned()
                .collect();
            if missing.is_empty() {
                continue;
            }
            match groups.iter_mut().find(|(actions, _)| *actions == missing) {
                Some((_, resources)) => resources.push(resource.clone()),
                None => groups.push((missing, vec![resource.clone()])),
            }
        }

        let added = groups.len();
        self.statements.extend(
            groups
                .into_iter()
                .map(|(actions, resources)| PolicyStatement::new(actions, resources)),
        );
        added
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub vcpu: u32,
    pub memory_mib: u32,
}

impl Default for ContainerResources {
    fn default() -> Self {
        Self {
            vcpu: 1,
            memory_mib: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub resources: ContainerResources,
    pub platform_version: String,
    pub assign_public_ip: bool,
}

/// One-way binding from a schedule rule to a job definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBinding {
    pub rule_name: String,
    pub schedule: Schedule,
    pub job_queue_arn: String,
    pub job_definition: String,
}

/// Complete job definition handed to the deployment layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub command: Vec<String>,
    pub execution_identity: Identity,
    pub job_identity: Identity,
    pub container: ContainerSpec,
    pub trigger: Option<TriggerBinding>,
}

/// Shared batch infrastructure jobs are assembled against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnvironment {
    pub image_uri: String,
    pub job_queue_arn: String,
    /// Bucket for query intermediates; the job identity gets read/write on it
    #[serde(default)]
    pub staging_bucket: Option<String>,
}

/// What to assemble
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub name: String,
    pub command: Vec<String>,
    pub policy_bundle: Vec<ResolvedPolicy>,
    pub resources: ContainerResources,
    pub schedule: Option<Schedule>,
}

pub struct JobAssembler<'a> {
    batch: &'a BatchEnvironment,
    env: &'a DeployEnv,
}

impl<'a> JobAssembler<'a> {
    pub fn new(batch: &'a BatchEnvironment, env: &'a DeployEnv) -> Self {
        Self { batch, env }
    }

    pub fn assemble(&self, request: JobRequest) -> Result<JobSpec> {
        self.validate(&request)?;

        let execution_identity = self.execution_identity(&request.name);

        let mut job_identity = Identity::new(
            format!("{}-job-role", request.name),
            "Job role used by Batch with access to resources for running queries",
        );
        for policy in &request.policy_bundle {
            for statement in policy.statements() {
                let added = job_identity.attach(statement);
                debug!(job = %request.name, added = added, "Attached resolved statement");
            }
        }
        if let Some(bucket) = &self.batch.staging_bucket {
            job_identity.attach(&self.staging_statement(bucket)?);
        }

        let trigger = request.schedule.map(|schedule| TriggerBinding {
            rule_name: format!("batcham_{}_schedule", request.name),
            schedule,
            job_queue_arn: self.batch.job_queue_arn.clone(),
            job_definition: request.name.clone(),
        });

        let container = ContainerSpec {
            image: self.batch.image_uri.clone(),
            command: request.command.clone(),
            resources: request.resources,
            platform_version: FARGATE_PLATFORM_VERSION.to_string(),
            assign_public_ip: true,
        };

        info!(
            job = %request.name,
            statements = job_identity.statements.len(),
            scheduled = trigger.is_some(),
            "Assembled job definition"
        );

        Ok(JobSpec {
            name: request.name,
            command: request.command,
            execution_identity,
            job_identity,
            container,
            trigger,
        })
    }

    fn validate(&self, request: &JobRequest) -> Result<()> {
        if request.name.trim().is_empty() {
            return Err(Error::invalid_job("job name must not be empty"));
        }
        if request.command.is_empty() {
            return Err(Error::invalid_job(format!(
                "job '{}' has an empty command",
                request.name
            )));
        }
        if request.resources.vcpu == 0 || request.resources.memory_mib == 0 {
            return Err(Error::invalid_job(format!(
                "job '{}' needs non-zero vcpu and memory",
                request.name
            )));
        }
        if self.batch.image_uri.is_empty() || self.batch.job_queue_arn.is_empty() {
            return Err(Error::invalid_job(
                "batch environment needs an image uri and a job queue arn",
            ));
        }
        Ok(())
    }

    /// Scoped to logging only; never carries resolved statements
    fn execution_identity(&self, job_name: &str) -> Identity {
        let mut identity = Identity::new(
            format!("{}-exec-role", job_name),
            "Execution role used by Batch",
        );
        identity
            .managed_policies
            .push(TASK_EXECUTION_MANAGED_POLICY.to_string());
        identity.attach(&PolicyStatement::new(
            LOG_ACTIONS.iter().copied(),
            vec![format!("arn:{}:logs:*:*:*", self.env.partition)],
        ));
        identity
    }

    fn staging_statement(&self, bucket: &str) -> Result<PolicyStatement> {
        if bucket.is_empty() || bucket.contains('/') {
            return Err(Error::malformed_location(
                format!("s3://{}", bucket),
                "staging bucket must be a bare bucket name",
            ));
        }
        let root = self.env.s3_bucket_arn(bucket);
        Ok(PolicyStatement::new(
            storage_actions(AccessLevel::Write),
            vec![root.clone(), format!("{}/*", root)],
        ))
    }
}
