//! Tests for the MongoDB Data API legacy store.

use super::*;
use crate::connectors::LegacyStore;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(url: &str) -> MongoDataApiConfig {
    MongoDataApiConfig {
        data_api_url: url.to_string(),
        api_key: "key".to_string(),
        data_source: "cluster0".to_string(),
        collection: "commits".to_string(),
    }
}

#[test]
fn test_mongodb_config_defaults() {
    let json = r#"{"data_api_url":"https://test.com","api_key":"k"}"#;
    let config: MongoDataApiConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.data_source, "mongodb-atlas");
    assert_eq!(config.collection, "commits");
}

#[test]
fn test_mongodb_store_new() {
    let store = MongoDataApiStore::new(test_config("https://example.com")).unwrap();
    assert_eq!(store.store_type(), "mongodb");
}

#[test]
fn test_mongodb_build_url() {
    let store = MongoDataApiStore::new(test_config(
        "https://data.mongodb-api.com/app/test/endpoint/data/v1/",
    ))
    .unwrap();
    assert_eq!(
        store.build_url("find"),
        "https://data.mongodb-api.com/app/test/endpoint/data/v1/action/find"
    );
}

#[test]
fn test_page_filter() {
    assert_eq!(MongoDataApiStore::page_filter(None), json!({}));
    assert_eq!(
        MongoDataApiStore::page_filter(Some(41)),
        json!({"_id": {"$gt": 41}})
    );
}

#[test]
fn test_count_field_accepts_canonical_numbers() {
    let document = json!({"_id": 0, "commits": {"$numberInt": "3"}, "events": {"$numberLong": "12"}});
    assert_eq!(count_field(&document, "commits").unwrap(), 3);
    assert_eq!(count_field(&document, "events").unwrap(), 12);
    assert!(count_field(&document, "missing").is_err());
    assert!(count_field(&json!({"events": -1}), "events").is_err());
}

#[test]
fn test_find_request_serialization() {
    let req = FindRequest {
        data_source: "atlas",
        database: "event_store",
        collection: "commits",
        filter: MongoDataApiStore::page_filter(Some(10)),
        projection: None,
        sort: Some(json!({"_id": 1})),
        limit: Some(50),
    };
    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["dataSource"], "atlas");
    assert_eq!(json["sort"]["_id"], 1);
    assert_eq!(json["limit"], 50);
    assert!(json.get("projection").is_none());
}

#[tokio::test]
async fn test_count_commits_and_events() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/action/aggregate"))
        .and(header("api-key", "key"))
        .and(body_partial_json(json!({
            "database": "tenant_a",
            "collection": "commits",
            "pipeline": MongoDataApiStore::count_pipeline(),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{"_id": {"$numberInt": "0"}, "commits": {"$numberInt": "4"}, "events": {"$numberInt": "9"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = MongoDataApiStore::new(test_config(&server.uri())).unwrap();
    let totals = store.count_commits_and_events("tenant_a").await.unwrap();
    assert_eq!(
        totals,
        CommitTotals {
            commits: 4,
            events: 9
        }
    );
}

#[tokio::test]
async fn test_count_on_empty_collection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/action/aggregate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"documents": []})))
        .mount(&server)
        .await;

    let store = MongoDataApiStore::new(test_config(&server.uri())).unwrap();
    let totals = store.count_commits_and_events("empty").await.unwrap();
    assert_eq!(totals, CommitTotals::default());
}

#[tokio::test]
async fn test_fetch_commits_pages_by_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/action/find"))
        .and(body_partial_json(json!({
            "filter": {"_id": {"$gt": 2}},
            "sort": {"_id": 1},
            "limit": 2
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{"_id": 3}, {"_id": 4}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = MongoDataApiStore::new(test_config(&server.uri())).unwrap();
    let page = store.fetch_commits("tenant_a", Some(2), 2).await.unwrap();
    assert_eq!(page, vec![json!({"_id": 3}), json!({"_id": 4})]);
}

#[tokio::test]
async fn test_connect_checks_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/action/findOne"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let store = MongoDataApiStore::new(test_config(&server.uri())).unwrap();
    let result = store.connect("tenant_a").await;
    assert!(matches!(result, Err(Error::Authentication(_))));
}

#[tokio::test]
async fn test_rate_limit_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let store = MongoDataApiStore::new(test_config(&server.uri())).unwrap();
    let result = store.fetch_commits("tenant_a", None, 10).await;
    assert!(matches!(result, Err(Error::RateLimit(_))));
}
