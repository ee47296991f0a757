//! Destination store reached through the runtime's HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{CommitResponse, EventStore, ExecutionContext, UncommittedAggregateEvents};
use crate::connectors::common::{create_http_client, validate_url};
use crate::error::{Error, Result};

/// Default runtime host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default runtime port.
pub const DEFAULT_PORT: u16 = 50053;

const COMMIT_FOR_AGGREGATE: &str = "api/v1/event-store/commit-for-aggregate";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitForAggregateRequest<'a> {
    execution_context: &'a ExecutionContext,
    aggregate: &'a UncommittedAggregateEvents,
}

/// Event store client for a runtime listening on `host:port`.
#[derive(Debug, Clone)]
pub struct RuntimeEventStore {
    base_url: String,
    client: Client,
}

impl RuntimeEventStore {
    /// Creates a client for `http://{host}:{port}`.
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_base_url(format!("http://{}:{}", host, port))
    }

    /// Creates a client for an explicit base URL.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: create_http_client(),
        }
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks that the base URL is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed URL.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.base_url)
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }
}

impl Default for RuntimeEventStore {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

#[async_trait]
impl EventStore for RuntimeEventStore {
    fn store_type(&self) -> &'static str {
        "runtime"
    }

    async fn commit_for_aggregate(
        &self,
        execution_context: &ExecutionContext,
        events: UncommittedAggregateEvents,
    ) -> Result<CommitResponse> {
        let url = self.build_url(COMMIT_FOR_AGGREGATE);
        let request = CommitForAggregateRequest {
            execution_context,
            aggregate: &events,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                Error::DestinationConnection(format!("Runtime request to {} failed: {}", url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(match status.as_u16() {
                401 | 403 => Error::Authentication(format!("Runtime auth failed: {}", body)),
                code => Error::DestinationConnection(format!("Runtime error {}: {}", code, body)),
            });
        }

        let response: CommitResponse = response.json().await.map_err(|e| {
            Error::DestinationConnection(format!("Failed to parse runtime response: {}", e))
        })?;

        debug!(
            failed = response.failure.is_some(),
            version = ?response.aggregate_root_version,
            "Runtime commit response"
        );

        Ok(response)
    }
}
