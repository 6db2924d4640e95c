//! Ingestion against mocked explorer and LLM endpoints.

mod common;

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::{json, Value};

use chainsight::ingest::IngestionService;
use chainsight::store::{SqliteStore, TransactionStore};
use chainsight::Error;

use common::{chat_reply, config_for, explorer_ok, explorer_tx, messages_reply};

const ADDRESS: &str = "0x742d35cc6634c0532925a3b844bc454e4438f44e";

fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

#[tokio::test]
async fn test_one_bad_item_does_not_stop_the_batch() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();

    let txs = vec![
        explorer_tx("0x01", "1000000000000000000", 1700000005),
        explorer_tx("0x02", "0", 1700000004),
        explorer_tx("0x03", "not-a-number", 1700000003),
        explorer_tx("0x04", "2000000000000000000", 1700000002),
        explorer_tx("0x05", "5", 1700000001),
    ];
    let explorer = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api")
                .query_param("module", "account")
                .query_param("action", "txlist")
                .query_param("address", ADDRESS)
                .query_param("offset", "5")
                .query_param("sort", "desc")
                .query_param("apikey", "explorer-test-key");
            then.status(200).json_body(explorer_ok(txs));
        })
        .await;

    let store = store();
    let service = IngestionService::from_config(&config_for(&server, dir.path()), store.clone()).unwrap();
    let report = service.ingest(ADDRESS, 5).await.unwrap();

    explorer.assert_async().await;
    assert_eq!(report.total_fetched, 5);
    assert_eq!(report.processed, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(store.count().unwrap(), 4);
    assert!(store.get("0x03").unwrap().is_none());

    let record = store.get("0x04").unwrap().unwrap();
    assert_eq!(record.time, 1700000002);
    let parsed: Value = serde_json::from_str(&record.parsed_json).unwrap();
    assert_eq!(parsed["action"], "transfer");
    assert_eq!(parsed["amount"], "2.0");
    let raw: Value = serde_json::from_str(&record.raw_json).unwrap();
    assert_eq!(raw["blockNumber"], "14000000");
}

#[tokio::test]
async fn test_out_of_range_timestamp_is_a_per_item_failure() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(200).json_body(explorer_ok(vec![
                explorer_tx("0xbefore", "1000000000000000000", 1700000002),
                explorer_tx("0xfar", "1000000000000000000", 253402300800),
                explorer_tx("0xafter", "0", 1700000001),
            ]));
        })
        .await;

    let store = store();
    let report = IngestionService::from_config(&config_for(&server, dir.path()), store.clone())
        .unwrap()
        .ingest(ADDRESS, 3)
        .await
        .unwrap();

    assert_eq!(report.total_fetched, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert!(store.get("0xfar").unwrap().is_none());
    assert!(store.get("0xafter").unwrap().is_some());
}

#[tokio::test]
async fn test_reingest_overwrites() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(200).json_body(explorer_ok(vec![
                explorer_tx("0xaa", "1", 1),
                explorer_tx("0xbb", "2", 2),
            ]));
        })
        .await;

    let store = store();
    let service = IngestionService::from_config(&config_for(&server, dir.path()), store.clone()).unwrap();
    service.ingest(ADDRESS, 10).await.unwrap();
    service.ingest(ADDRESS, 10).await.unwrap();
    assert_eq!(store.count().unwrap(), 2);
}

#[tokio::test]
async fn test_uses_llm_annotation_when_configured() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(200)
                .json_body(explorer_ok(vec![explorer_tx("0xswap", "0", 1700000000)]));
        })
        .await;
    let llm = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/deepseek/v1/chat/completions")
                .header("authorization", "Bearer ds-key")
                .body_includes("0xswap")
                .body_includes("\"temperature\":0.1");
            then.status(200).json_body(chat_reply(&json!({
                "action": "swap",
                "token": "USDC",
                "amount": "100",
                "confidence": 0.9
            })));
        })
        .await;

    let config = config_for(&server, dir.path()).with_deepseek_key("ds-key");
    let store = store();
    let report = IngestionService::from_config(&config, store.clone())
        .unwrap()
        .ingest(ADDRESS, 1)
        .await
        .unwrap();

    llm.assert_async().await;
    assert_eq!(report.processed, 1);
    let parsed: Value =
        serde_json::from_str(&store.get("0xswap").unwrap().unwrap().parsed_json).unwrap();
    assert_eq!(parsed["action"], "swap");
    assert_eq!(parsed["token"], "USDC");
    // Backfilled from the transaction
    assert_eq!(parsed["time"], "2023-11-14T22:13:20Z");
    assert_eq!(parsed["risk_level"], "high");
    assert!(parsed.get("error").is_none());
}

#[tokio::test]
async fn test_falls_through_to_second_provider() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(200)
                .json_body(explorer_ok(vec![explorer_tx("0xmint", "0", 1700000000)]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/deepseek/v1/chat/completions");
            then.status(503).body("overloaded");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/anthropic/v1/messages")
                .header("x-api-key", "an-key");
            then.status(200)
                .json_body(messages_reply(&json!({"action": "mint", "token": "NFT"})));
        })
        .await;

    let config = config_for(&server, dir.path())
        .with_deepseek_key("ds-key")
        .with_anthropic_key("an-key");
    let store = store();
    IngestionService::from_config(&config, store.clone())
        .unwrap()
        .ingest(ADDRESS, 1)
        .await
        .unwrap();

    let parsed: Value =
        serde_json::from_str(&store.get("0xmint").unwrap().unwrap().parsed_json).unwrap();
    assert_eq!(parsed["action"], "mint");
}

#[tokio::test]
async fn test_falls_back_to_rules_when_every_model_fails() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(200).json_body(explorer_ok(vec![explorer_tx(
                "0xrule",
                "1500000000000000000",
                1642234567,
            )]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/deepseek/v1/chat/completions");
            then.status(200)
                .json_body(chat_reply(&json!("this is not an object")));
        })
        .await;

    let config = config_for(&server, dir.path()).with_deepseek_key("ds-key");
    let store = store();
    IngestionService::from_config(&config, store.clone())
        .unwrap()
        .ingest(ADDRESS, 1)
        .await
        .unwrap();

    let parsed: Value =
        serde_json::from_str(&store.get("0xrule").unwrap().unwrap().parsed_json).unwrap();
    assert_eq!(parsed["action"], "transfer");
    assert_eq!(parsed["amount"], "1.5");
    assert_eq!(parsed["confidence"], 0.7);
}

#[tokio::test]
async fn test_slow_model_falls_back_to_rules() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(200).json_body(explorer_ok(vec![explorer_tx(
                "0xslow",
                "2000000000000000000",
                1642234567,
            )]));
        })
        .await;
    let llm = server
        .mock_async(|when, then| {
            when.method(POST).path("/deepseek/v1/chat/completions");
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(chat_reply(&json!({"action": "swap"})));
        })
        .await;

    let mut config = config_for(&server, dir.path()).with_deepseek_key("ds-key");
    config.parse_timeout_secs = 1;
    let store = store();
    let report = IngestionService::from_config(&config, store.clone())
        .unwrap()
        .ingest(ADDRESS, 1)
        .await
        .unwrap();

    llm.assert_async().await;
    assert_eq!(report.processed, 1);
    let parsed: Value =
        serde_json::from_str(&store.get("0xslow").unwrap().unwrap().parsed_json).unwrap();
    assert_eq!(parsed["action"], "transfer");
    assert_eq!(parsed["amount"], "2.0");
    assert_eq!(parsed["confidence"], 0.7);
}

#[tokio::test]
async fn test_upstream_status_is_an_error() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(200).json_body(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Invalid API Key"
            }));
        })
        .await;

    let store = store();
    let err = IngestionService::from_config(&config_for(&server, dir.path()), store.clone())
        .unwrap()
        .ingest(ADDRESS, 10)
        .await
        .unwrap_err();

    match err {
        Error::Upstream(msg) => assert!(msg.contains("NOTOK")),
        other => panic!("expected upstream error, got {:?}", other),
    }
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_missing_explorer_key() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&server, dir.path());
    config.explorer.api_key = None;

    let err = IngestionService::from_config(&config, store())
        .unwrap()
        .ingest(ADDRESS, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_explorer_http_failure_is_transport_error() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api");
            then.status(502);
        })
        .await;

    let err = IngestionService::from_config(&config_for(&server, dir.path()), store())
        .unwrap()
        .ingest(ADDRESS, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}
