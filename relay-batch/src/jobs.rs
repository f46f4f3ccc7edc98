//! Job-related API operations

use crate::BatchClient;
use crate::error::Result;
use relay_core::dto::batch::{
    DescribeJobsRequest, DescribeJobsResponse, SubmitJobRequest, SubmitJobResponse,
    TerminateJobRequest,
};

impl BatchClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Submit a job against a registered job definition
    ///
    /// # Returns
    /// The service-assigned job id and the echoed job name
    pub async fn submit_job(&self, req: &SubmitJobRequest) -> Result<SubmitJobResponse> {
        self.call("submitjob", req).await
    }

    /// Describe a batch of jobs
    ///
    /// The caller is responsible for keeping the batch within
    /// [`crate::MAX_DESCRIBE_JOBS`].
    pub async fn describe_jobs(&self, job_ids: Vec<String>) -> Result<DescribeJobsResponse> {
        self.call("describejobs", &DescribeJobsRequest { jobs: job_ids })
            .await
    }

    /// Terminate a job that is queued or running
    pub async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()> {
        self.call_empty(
            "terminatejob",
            &TerminateJobRequest {
                job_id: job_id.to_string(),
                reason: reason.to_string(),
            },
        )
        .await
    }
}
