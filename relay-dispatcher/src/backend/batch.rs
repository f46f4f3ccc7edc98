//! Cloud batch backend
//!
//! Jobs run as containers on a managed batch service. Every submission needs
//! a registered job definition; those are content-addressed by tool and
//! resources and resolved through [`JobDefinitionCache`]. Status comes from
//! `describe_jobs`, which the service caps per call, so polls are chunked and
//! merged. Container output lives in the service's log store and is fetched
//! once a job is finished.

use async_trait::async_trait;
use relay_batch::{BatchApi, ClientError};
use relay_core::dto::batch::{
    ContainerOverrides, ContainerProperties, JobDetail, JobTimeout, KeyValuePair,
    RegisterJobDefinitionRequest, ResourceRequirement, RetryStrategy, SubmitJobRequest,
};
use relay_core::{
    DefinitionKey, DestinationSchema, JobPhase, ParamKind, ParamSpec, ParamValue,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BackendAdapter, BackendPhase, BackendStatus, LaunchRequest, PollTarget, resource_env};
use crate::config::BatchSettings;
use crate::error::BackendError;
use crate::service::definitions::{DefinitionStore, JobDefinitionCache};

/// Backend running jobs on a cloud batch service
pub struct CloudBatchBackend {
    api: Arc<dyn BatchApi>,
    settings: BatchSettings,
    schema: DestinationSchema,
    definitions: JobDefinitionCache,
}

impl CloudBatchBackend {
    pub fn new(api: Arc<dyn BatchApi>, settings: BatchSettings) -> Self {
        Self {
            api,
            settings,
            schema: DestinationSchema::new(vec![
                ParamSpec::required("job_queue", ParamKind::Text),
                ParamSpec::with_default("vcpu", ParamKind::Float, ParamValue::Float(1.0)),
                ParamSpec::with_default("memory", ParamKind::MemoryMb, ParamValue::Int(2048)),
                ParamSpec::optional("image", ParamKind::Text),
                ParamSpec::optional("gpu", ParamKind::Int),
                ParamSpec::with_default(
                    "platform",
                    ParamKind::Text,
                    ParamValue::Text("EC2".to_string()),
                ),
                ParamSpec::optional("retry_attempts", ParamKind::Int),
                ParamSpec::optional("timeout", ParamKind::Int),
            ]),
            definitions: JobDefinitionCache::new(),
        }
    }

    /// Definitions resolved so far by this process
    pub fn cached_definitions(&self) -> usize {
        self.definitions.len()
    }

    /// Whole CPUs exported to the container
    fn slots(launch: &LaunchRequest) -> i64 {
        launch
            .params
            .float("vcpu")
            .map(|v| v.ceil() as i64)
            .unwrap_or(1)
    }

    /// Registration body for the launch's definition
    fn definition_request(
        &self,
        name: &str,
        launch: &LaunchRequest,
    ) -> RegisterJobDefinitionRequest {
        let params = &launch.params;

        let mut resources = vec![
            ResourceRequirement {
                kind: "VCPU".to_string(),
                value: params.float("vcpu").unwrap_or(1.0).to_string(),
            },
            ResourceRequirement {
                kind: "MEMORY".to_string(),
                value: params.int("memory").unwrap_or(2048).to_string(),
            },
        ];
        if let Some(gpu) = params.int("gpu").filter(|g| *g > 0) {
            resources.push(ResourceRequirement {
                kind: "GPU".to_string(),
                value: gpu.to_string(),
            });
        }

        RegisterJobDefinitionRequest {
            job_definition_name: name.to_string(),
            kind: "container".to_string(),
            platform_capabilities: vec![params.text("platform").unwrap_or("EC2").to_string()],
            container_properties: ContainerProperties {
                image: params
                    .text("image")
                    .unwrap_or(&self.settings.default_image)
                    .to_string(),
                command: Vec::new(),
                resource_requirements: resources,
                environment: Vec::new(),
                job_role_arn: self.settings.job_role_arn.clone(),
                privileged: false,
            },
            retry_strategy: params
                .int("retry_attempts")
                .map(|attempts| RetryStrategy {
                    attempts: attempts.clamp(1, 10) as u32,
                }),
            timeout: params.int("timeout").map(|secs| JobTimeout {
                attempt_duration_seconds: secs.max(60) as u64,
            }),
        }
    }

    /// Joined log messages of a finished container
    async fn fetch_logs(&self, log_stream: &str) -> Result<String, ClientError> {
        let logs = self
            .api
            .get_log_events(&self.settings.log_group, log_stream)
            .await?;
        let mut output = String::new();
        for event in logs.events {
            output.push_str(&event.message);
            output.push('\n');
        }
        Ok(output)
    }

    async fn status_of(&self, detail: &JobDetail) -> BackendStatus {
        let phase = detail.status.to_phase();
        let mut reported = BackendPhase::new(phase);
        reported.exit_code = detail.exit_code();

        if phase == JobPhase::Error {
            reported.reason = Some(
                detail
                    .failure_reason()
                    .unwrap_or("job failed on the batch service")
                    .to_string(),
            );
        }

        if phase.is_terminal() {
            if let Some(stream) = detail.log_stream_name() {
                match self.fetch_logs(stream).await {
                    Ok(stdout) => {
                        // Container logs interleave both streams
                        reported.stdout = Some(stdout);
                        reported.stderr = Some(String::new());
                    }
                    Err(e) => {
                        return BackendStatus::CheckFailed(format!(
                            "failed to fetch logs of {}: {}",
                            detail.job_id, e
                        ));
                    }
                }
            }
        }

        BackendStatus::Phase(reported)
    }
}

#[async_trait]
impl DefinitionStore for CloudBatchBackend {
    type Spec = RegisterJobDefinitionRequest;

    async fn lookup(&self, name: &str) -> Result<Option<String>, BackendError> {
        let found = self.api.describe_job_definitions(name).await?;
        Ok(found
            .job_definitions
            .into_iter()
            .filter(|d| d.job_definition_name == name)
            .max_by_key(|d| d.revision)
            .map(|d| d.job_definition_arn))
    }

    async fn register(&self, name: &str, spec: &Self::Spec) -> Result<String, BackendError> {
        let mut request = spec.clone();
        request.job_definition_name = name.to_string();
        let registered = self.api.register_job_definition(request).await?;
        Ok(registered.job_definition_arn)
    }
}

#[async_trait]
impl BackendAdapter for CloudBatchBackend {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn destination_schema(&self) -> &DestinationSchema {
        &self.schema
    }

    fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn describe_or_register_definition(
        &self,
        launch: &LaunchRequest,
    ) -> Result<String, BackendError> {
        let key = DefinitionKey::derive(&launch.tool_id, &launch.tool_version, &launch.params);
        let request = self.definition_request(&key.definition_name(), launch);
        self.definitions.get_or_register(&key, self, &request).await
    }

    async fn submit(&self, launch: &LaunchRequest) -> Result<String, BackendError> {
        if launch.precheck_script.is_some() {
            warn!(
                "Job {} has a precheck script; the batch backend runs the command without it",
                launch.job_id
            );
        }

        let job_queue = launch
            .params
            .text("job_queue")
            .ok_or_else(|| BackendError::Protocol("destination has no job_queue".to_string()))?
            .to_string();
        let job_definition = self.describe_or_register_definition(launch).await?;

        let environment = resource_env(Some(Self::slots(launch)), launch.params.int("memory"))
            .into_iter()
            .map(|(name, value)| KeyValuePair::new(name, value))
            .collect();

        let request = SubmitJobRequest {
            job_name: launch.job_name.clone(),
            job_queue,
            job_definition,
            container_overrides: ContainerOverrides {
                command: vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    launch.command.clone(),
                ],
                environment,
            },
        };

        let submitted = self.api.submit_job(request).await?;
        info!(
            "Submitted job {} ({}) to the batch service as {}",
            launch.job_id, launch.job_name, submitted.job_id
        );
        Ok(submitted.job_id)
    }

    async fn poll(
        &self,
        targets: &[PollTarget],
    ) -> Result<HashMap<String, BackendStatus>, BackendError> {
        let mut statuses = HashMap::with_capacity(targets.len());

        for chunk in targets.chunks(self.settings.max_describe.max(1)) {
            let ids: Vec<String> = chunk.iter().map(|t| t.backend_job_id.clone()).collect();

            let described = match self.api.describe_jobs(ids).await {
                Ok(described) => described,
                Err(e) => {
                    // Only this chunk goes unchecked; the others still settle
                    warn!("Failed to describe {} batch job(s): {}", chunk.len(), e);
                    for target in chunk {
                        statuses.insert(
                            target.backend_job_id.clone(),
                            BackendStatus::CheckFailed(e.to_string()),
                        );
                    }
                    continue;
                }
            };

            for detail in &described.jobs {
                let status = self.status_of(detail).await;
                statuses.insert(detail.job_id.clone(), status);
            }

            for target in chunk {
                if !statuses.contains_key(&target.backend_job_id) {
                    debug!("Batch service no longer knows {}", target.backend_job_id);
                    statuses.insert(target.backend_job_id.clone(), BackendStatus::Lost);
                }
            }
        }

        Ok(statuses)
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError> {
        match self
            .api
            .terminate_job(backend_job_id, "Cancelled by relay dispatcher")
            .await
        {
            Ok(()) => {
                info!("Terminated batch job {}", backend_job_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Batch job {} is already gone", backend_job_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
