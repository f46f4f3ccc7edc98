//! Relay Batch Client
//!
//! A typed HTTP client for the cloud batch-compute service that the batch
//! backend adapter runs jobs on.
//!
//! The [`BatchApi`] trait is the seam the dispatcher depends on; [`BatchClient`]
//! is its HTTP implementation. Every call goes through a single wrapper that
//! logs the failing operation and hands the error back to the caller, which
//! decides whether it is a submission or a poll failure.
//!
//! # Example
//!
//! ```no_run
//! use relay_batch::{BatchApi, BatchClient};
//!
//! # async fn example() -> relay_batch::Result<()> {
//! let client = BatchClient::new("http://localhost:4566");
//! let described = client.describe_jobs(vec!["job-1".to_string()]).await?;
//! println!("{} job(s) described", described.jobs.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
mod definitions;
mod jobs;
mod logs;

pub use error::{ClientError, Result};

use async_trait::async_trait;
use relay_core::dto::batch::{
    DescribeJobDefinitionsResponse, DescribeJobsResponse, GetLogEventsResponse,
    RegisterJobDefinitionRequest, RegisterJobDefinitionResponse, SubmitJobRequest,
    SubmitJobResponse,
};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

/// Maximum number of job ids the service accepts per `describe_jobs` call
pub const MAX_DESCRIBE_JOBS: usize = 100;

/// Operations the batch backend needs from the service
///
/// All methods are safe to call concurrently.
#[async_trait]
pub trait BatchApi: Send + Sync {
    async fn submit_job(&self, req: SubmitJobRequest) -> Result<SubmitJobResponse>;

    /// Describes at most [`MAX_DESCRIBE_JOBS`] jobs; ids the service does not
    /// know are simply absent from the response
    async fn describe_jobs(&self, job_ids: Vec<String>) -> Result<DescribeJobsResponse>;

    async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()>;

    /// Looks up active definitions registered under `name`
    async fn describe_job_definitions(&self, name: &str)
    -> Result<DescribeJobDefinitionsResponse>;

    async fn register_job_definition(
        &self,
        req: RegisterJobDefinitionRequest,
    ) -> Result<RegisterJobDefinitionResponse>;

    async fn get_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<GetLogEventsResponse>;
}

/// HTTP client for the batch service
#[derive(Debug, Clone)]
pub struct BatchClient {
    /// Base URL of the service (e.g., "http://localhost:4566")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl BatchClient {
    /// Create a new batch client
    ///
    /// # Example
    /// ```
    /// use relay_batch::BatchClient;
    ///
    /// let client = BatchClient::new("http://localhost:4566");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new batch client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn operation_url(&self, operation: &str) -> String {
        format!("{}/v1/{}", self.base_url, operation)
    }

    // =============================================================================
    // Call wrapper
    // =============================================================================

    /// POST a JSON body to an operation and decode the JSON reply
    ///
    /// Any transport or service error is logged here and returned unchanged.
    async fn call<Req, Resp>(&self, operation: &'static str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        debug!("Batch API call: {}", operation);

        let result = match self.send(operation, body).await {
            Ok(response) => self.handle_response(response).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Batch API call {} failed: {}", operation, e);
        }
        result
    }

    /// Same as [`Self::call`] for operations whose reply carries no data
    async fn call_empty<Req>(&self, operation: &'static str, body: &Req) -> Result<()>
    where
        Req: Serialize + ?Sized + Sync,
    {
        debug!("Batch API call: {}", operation);

        let result = match self.send(operation, body).await {
            Ok(response) => self.handle_empty_response(response).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Batch API call {} failed: {}", operation, e);
        }
        result
    }

    async fn send<Req>(&self, operation: &'static str, body: &Req) -> Result<reqwest::Response>
    where
        Req: Serialize + ?Sized + Sync,
    {
        let response = self
            .client
            .post(self.operation_url(operation))
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a reply whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl BatchApi for BatchClient {
    async fn submit_job(&self, req: SubmitJobRequest) -> Result<SubmitJobResponse> {
        BatchClient::submit_job(self, &req).await
    }

    async fn describe_jobs(&self, job_ids: Vec<String>) -> Result<DescribeJobsResponse> {
        BatchClient::describe_jobs(self, job_ids).await
    }

    async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()> {
        BatchClient::terminate_job(self, job_id, reason).await
    }

    async fn describe_job_definitions(
        &self,
        name: &str,
    ) -> Result<DescribeJobDefinitionsResponse> {
        BatchClient::describe_job_definitions(self, name).await
    }

    async fn register_job_definition(
        &self,
        req: RegisterJobDefinitionRequest,
    ) -> Result<RegisterJobDefinitionResponse> {
        BatchClient::register_job_definition(self, &req).await
    }

    async fn get_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<GetLogEventsResponse> {
        BatchClient::get_log_events(self, log_group, log_stream).await
    }
}
