//! Legacy event store hosted in MongoDB.
//!
//! Reads the `commits` collection of each event store database through the
//! MongoDB Data API (REST). Documents are requested as canonical Extended
//! JSON so that binary identifiers keep their sub-type.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::connectors::common::{create_http_client, handle_http_error, validate_url};
use crate::connectors::{CommitTotals, LegacyStore};
use crate::error::{Error, Result};
use crate::legacy::LegacyValue;

/// Configuration for a legacy store behind the MongoDB Data API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoDataApiConfig {
    /// MongoDB Data API endpoint URL.
    /// Format: https://data.mongodb-api.com/app/<app-id>/endpoint/data/v1
    pub data_api_url: String,
    /// MongoDB Data API key.
    pub api_key: String,
    /// Linked data source (cluster) name.
    #[serde(default = "default_data_source")]
    pub data_source: String,
    /// Collection holding the commits.
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_data_source() -> String {
    "mongodb-atlas".to_string()
}

fn default_collection() -> String {
    "commits".to_string()
}

/// Request body for the Data API `find` and `findOne` actions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest<'a> {
    data_source: &'a str,
    database: &'a str,
    collection: &'a str,
    filter: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    projection: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
}

/// Response from the `find` action.
#[derive(Debug, Deserialize)]
struct FindResponse {
    documents: Vec<Value>,
}

/// Request body for the `aggregate` action.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateRequest<'a> {
    data_source: &'a str,
    database: &'a str,
    collection: &'a str,
    pipeline: Vec<Value>,
}

/// Response from the `aggregate` action.
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    documents: Vec<Value>,
}

/// Legacy store read through the MongoDB Data API.
pub struct MongoDataApiStore {
    config: MongoDataApiConfig,
    client: Client,
}

impl MongoDataApiStore {
    /// Creates a store with a configured HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint URL is not http(s).
    pub fn new(config: MongoDataApiConfig) -> Result<Self> {
        validate_url(&config.data_api_url)?;
        Ok(Self {
            config,
            client: create_http_client(),
        })
    }

    /// Builds the API URL for a specific action.
    fn build_url(&self, action: &str) -> String {
        format!(
            "{}/action/{}",
            self.config.data_api_url.trim_end_matches('/'),
            action
        )
    }

    /// Makes a POST request to the MongoDB Data API.
    async fn api_request<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        body: &T,
    ) -> Result<R> {
        let url = self.build_url(action);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/ejson")
            .header("api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::SourceConnection(format!("MongoDB API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(handle_http_error(status.as_u16(), &body, "MongoDB"));
        }

        response.json().await.map_err(|e| {
            Error::SourceConnection(format!("Failed to parse MongoDB response: {}", e))
        })
    }

    /// One pass over the collection yielding `{commits, events}`.
    fn count_pipeline() -> Vec<Value> {
        vec![
            json!({ "$project": { "events": { "$size": "$events" } } }),
            json!({ "$group": { "_id": 0, "commits": { "$sum": 1 }, "events": { "$sum": "$events" } } }),
        ]
    }

    fn page_filter(after: Option<i64>) -> Value {
        match after {
            Some(id) => json!({ "_id": { "$gt": id } }),
            None => json!({}),
        }
    }
}

/// Reads a non-negative count out of an aggregate result document.
fn count_field(document: &Value, field: &str) -> Result<u64> {
    let value = document
        .get(field)
        .ok_or_else(|| Error::malformed("commit totals", format!("missing field '{}'", field)))?;

    LegacyValue::from_extended_json(value)
        .ok()
        .and_then(|v| v.as_i64())
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| {
            Error::malformed("commit totals", format!("'{}' is not a count: {}", field, value))
        })
}

#[async_trait]
impl LegacyStore for MongoDataApiStore {
    fn store_type(&self) -> &'static str {
        "mongodb"
    }

    async fn connect(&self, database: &str) -> Result<()> {
        debug!("Connecting to {}/{}", self.config.data_api_url, database);

        let request = FindRequest {
            data_source: &self.config.data_source,
            database,
            collection: &self.config.collection,
            filter: json!({}),
            projection: Some(json!({ "_id": 1 })),
            sort: None,
            limit: None,
        };

        let _: Value = self.api_request("findOne", &request).await?;
        Ok(())
    }

    async fn count_commits_and_events(&self, database: &str) -> Result<CommitTotals> {
        let request = AggregateRequest {
            data_source: &self.config.data_source,
            database,
            collection: &self.config.collection,
            pipeline: Self::count_pipeline(),
        };

        let response: AggregateResponse = self.api_request("aggregate", &request).await?;

        match response.documents.last() {
            Some(document) => Ok(CommitTotals {
                commits: count_field(document, "commits")?,
                events: count_field(document, "events")?,
            }),
            None => Ok(CommitTotals::default()),
        }
    }

    async fn fetch_commits(
        &self,
        database: &str,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let request = FindRequest {
            data_source: &self.config.data_source,
            database,
            collection: &self.config.collection,
            filter: Self::page_filter(after),
            projection: None,
            sort: Some(json!({ "_id": 1 })),
            limit: Some(limit as u64),
        };

        let response: FindResponse = self.api_request("find", &request).await?;
        Ok(response.documents)
    }
}

#[cfg(test)]
#[path = "mongodb_tests.rs"]
mod tests;
