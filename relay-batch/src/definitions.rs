//! Job definition API operations

use crate::BatchClient;
use crate::error::Result;
use relay_core::dto::batch::{
    DescribeJobDefinitionsRequest, DescribeJobDefinitionsResponse, RegisterJobDefinitionRequest,
    RegisterJobDefinitionResponse,
};

impl BatchClient {
    /// List the active definitions registered under a name
    pub async fn describe_job_definitions(
        &self,
        name: &str,
    ) -> Result<DescribeJobDefinitionsResponse> {
        self.call(
            "describejobdefinitions",
            &DescribeJobDefinitionsRequest {
                job_definition_name: name.to_string(),
                status: "ACTIVE".to_string(),
            },
        )
        .await
    }

    /// Register a new definition (or a new revision of an existing name)
    pub async fn register_job_definition(
        &self,
        req: &RegisterJobDefinitionRequest,
    ) -> Result<RegisterJobDefinitionResponse> {
        self.call("registerjobdefinition", req).await
    }
}
