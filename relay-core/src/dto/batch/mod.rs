//! Cloud batch-compute API DTOs
//!
//! Request and response bodies exchanged with the batch service. Field names
//! follow the service's camelCase JSON.

use serde::{Deserialize, Serialize};

use crate::domain::phase::JobPhase;

/// Job status as reported by the batch service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchJobStatus {
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl BatchJobStatus {
    pub fn to_phase(self) -> JobPhase {
        match self {
            BatchJobStatus::Submitted
            | BatchJobStatus::Pending
            | BatchJobStatus::Runnable
            | BatchJobStatus::Starting => JobPhase::Queued,
            BatchJobStatus::Running => JobPhase::Running,
            BatchJobStatus::Succeeded => JobPhase::Ok,
            BatchJobStatus::Failed => JobPhase::Error,
        }
    }
}

/// A single `name=value` environment entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

impl KeyValuePair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Resource requirement entry (`VCPU`, `MEMORY`, `GPU`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Container section of a job definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub resource_requirements: Vec<ResourceRequirement>,
    #[serde(default)]
    pub environment: Vec<KeyValuePair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_role_arn: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

/// Per-submission overrides of the definition's container section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverrides {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: Vec<KeyValuePair>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStrategy {
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTimeout {
    pub attempt_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub job_name: String,
    pub job_queue: String,
    pub job_definition: String,
    pub container_overrides: ContainerOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub job_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeJobsRequest {
    pub jobs: Vec<String>,
}

/// Container state of a described job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetail {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub log_stream_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub job_id: String,
    pub job_name: String,
    pub status: BatchJobStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub container: Option<ContainerDetail>,
}

impl JobDetail {
    pub fn exit_code(&self) -> Option<i32> {
        self.container.as_ref().and_then(|c| c.exit_code)
    }

    pub fn log_stream_name(&self) -> Option<&str> {
        self.container
            .as_ref()
            .and_then(|c| c.log_stream_name.as_deref())
    }

    /// Most specific failure reason the service gave
    pub fn failure_reason(&self) -> Option<&str> {
        self.container
            .as_ref()
            .and_then(|c| c.reason.as_deref())
            .or(self.status_reason.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeJobsResponse {
    #[serde(default)]
    pub jobs: Vec<JobDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateJobRequest {
    pub job_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeJobDefinitionsRequest {
    pub job_definition_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub job_definition_name: String,
    pub job_definition_arn: String,
    pub revision: u32,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeJobDefinitionsResponse {
    #[serde(default)]
    pub job_definitions: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterJobDefinitionRequest {
    pub job_definition_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub platform_capabilities: Vec<String>,
    pub container_properties: ContainerProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<RetryStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<JobTimeout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterJobDefinitionResponse {
    pub job_definition_name: String,
    pub job_definition_arn: String,
    pub revision: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLogEventsRequest {
    pub log_group_name: String,
    pub log_stream_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetLogEventsResponse {
    #[serde(default)]
    pub events: Vec<LogEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(BatchJobStatus::Runnable.to_phase(), JobPhase::Queued);
        assert_eq!(BatchJobStatus::Starting.to_phase(), JobPhase::Queued);
        assert_eq!(BatchJobStatus::Running.to_phase(), JobPhase::Running);
        assert_eq!(BatchJobStatus::Succeeded.to_phase(), JobPhase::Ok);
        assert_eq!(BatchJobStatus::Failed.to_phase(), JobPhase::Error);
    }

    #[test]
    fn test_job_detail_from_wire() {
        let detail: JobDetail = serde_json::from_str(
            r#"{
                "jobId": "a1",
                "jobName": "relay_42",
                "status": "FAILED",
                "statusReason": "Essential container in task exited",
                "container": {"exitCode": 137, "reason": "OutOfMemoryError: Container killed"}
            }"#,
        )
        .unwrap();

        assert_eq!(detail.status, BatchJobStatus::Failed);
        assert_eq!(detail.exit_code(), Some(137));
        assert_eq!(
            detail.failure_reason(),
            Some("OutOfMemoryError: Container killed")
        );
        assert!(detail.log_stream_name().is_none());
    }

    #[test]
    fn test_register_request_wire_names() {
        let req = RegisterJobDefinitionRequest {
            job_definition_name: "relay-bwa-0123".to_string(),
            kind: "container".to_string(),
            platform_capabilities: vec!["EC2".to_string()],
            container_properties: ContainerProperties {
                image: "busybox".to_string(),
                ..Default::default()
            },
            retry_strategy: None,
            timeout: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["jobDefinitionName"], "relay-bwa-0123");
        assert_eq!(value["type"], "container");
        assert_eq!(value["containerProperties"]["image"], "busybox");
        assert!(value.get("retryStrategy").is_none());
    }
}
