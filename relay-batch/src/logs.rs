//! Container log retrieval

use crate::BatchClient;
use crate::error::Result;
use relay_core::dto::batch::{GetLogEventsRequest, GetLogEventsResponse};

impl BatchClient {
    /// Fetch the log events of one job's container log stream
    pub async fn get_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<GetLogEventsResponse> {
        self.call(
            "getlogevents",
            &GetLogEventsRequest {
                log_group_name: log_group.to_string(),
                log_stream_name: log_stream.to_string(),
            },
        )
        .await
    }
}
