mod support;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Bytes;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chain_reader::{ChainReader, ChainRegistry};
use common::bonding_curve::CurveParams;
use common::events::RawLog;
use indexer::api::{router, AppState};
use indexer::batch::{BatchIndexer, BatchSettings};
use indexer::config::Environment;
use indexer::store::Store;
use indexer::webhook::{SignatureVerifier, WebhookIngress, SIGNATURE_HEADER};
use serde_json::{json, Value};
use support::*;
use tower::ServiceExt;

const SIGNING_KEY: &str = "whsec_test_key";
const CRON_SECRET: &str = "cron-secret";

struct TestApp {
    harness: Harness,
    app: Router,
}

fn build_app(environment: Environment, signing_key: Option<&str>, cron_secret: Option<&str>) -> TestApp {
    let harness = Harness::new();
    let mut registry = ChainRegistry::new();
    registry.insert(Arc::clone(&harness.chain) as Arc<dyn ChainReader>);

    let state = AppState {
        store: Arc::clone(&harness.store) as Arc<dyn Store>,
        registry: Arc::new(registry),
        default_chain_id: CHAIN_ID,
        curve: CurveParams::default(),
        webhook: Arc::new(WebhookIngress::new(
            Arc::clone(&harness.reconciler),
            signing_key.map(str::to_string),
            environment,
        )),
        batch: Arc::new(BatchIndexer::new(
            Arc::clone(&harness.reconciler),
            BatchSettings {
                group_limit: 10,
                chunk_size: 2000,
                group_time_budget: Duration::from_secs(60),
            },
        )),
        cron_secret: cron_secret.map(str::to_string),
        environment,
    };

    TestApp {
        harness,
        app: router(state),
    }
}

fn default_app() -> TestApp {
    build_app(Environment::Production, Some(SIGNING_KEY), Some(CRON_SECRET))
}

fn activity_for(log: &RawLog) -> Value {
    json!({
        "fromAddress": "0x0000000000000000000000000000000000000000",
        "hash": log.tx_hash,
        "category": "token",
        "log": {
            "address": log.address,
            "topics": log.topics,
            "data": log.data,
            "blockNumber": format!("{:#x}", log.block_number),
            "transactionHash": log.tx_hash,
            "transactionIndex": "0x0",
            "logIndex": format!("{:#x}", log.log_index),
            "removed": false
        }
    })
}

fn webhook_body(activity: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "webhookId": "wh_test",
        "id": "whevt_test",
        "type": "GRAPHQL",
        "event": { "network": "MATIC_AMOY", "activity": activity }
    }))
    .unwrap()
}

fn signed_post(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/alchemy")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header(SIGNATURE_HEADER, sig);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_signed_webhook_is_reconciled() {
    let t = default_app();
    let token = addr(0xaa);
    let group = t.harness.create_group(token, addr(0x01), 100, "1000", "10", "1000").await;

    let log = purchase_log(token, addr(0xb1), "1.0", "100", "0.011", Trade::at(120, 2));
    let body = webhook_body(vec![activity_for(&log)]);
    let signature = SignatureVerifier::new(SIGNING_KEY).sign(&body);

    let (status, json) = send(&t.app, signed_post(body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["applied"], 1);

    let after = t.harness.store.get_group(group.id).await.unwrap().unwrap();
    assert_eq!(after.total_supply, amount("1100"));
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let t = default_app();
    let token = addr(0xaa);
    let group = t.harness.create_group(token, addr(0x01), 100, "1000", "10", "1000").await;

    let log = purchase_log(token, addr(0xb1), "1.0", "100", "0.011", Trade::at(120, 2));
    let body = webhook_body(vec![activity_for(&log)]);
    let forged = SignatureVerifier::new("attacker").sign(&body);

    let (status, json) = send(&t.app, signed_post(body.clone(), Some(forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid signature");

    let (status, _) = send(&t.app, signed_post(body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let after = t.harness.store.get_group(group.id).await.unwrap().unwrap();
    assert_eq!(after.total_supply, amount("1000"));
}

#[tokio::test]
async fn test_failed_activity_does_not_stop_delivery() {
    let t = default_app();
    let token = addr(0xaa);
    t.harness.create_group(token, addr(0x01), 100, "1000", "10", "1000").await;

    let mut broken = purchase_log(token, addr(0xb1), "1.0", "100", "0.011", Trade::at(120, 0));
    broken.data = Bytes::from(broken.data[..8].to_vec());
    let good = purchase_log(token, addr(0xb2), "1.0", "100", "0.011", Trade::at(121, 0));
    let no_log = json!({ "hash": "0x01", "category": "external" });
    let body = webhook_body(vec![activity_for(&broken), no_log, activity_for(&good)]);
    let signature = SignatureVerifier::new(SIGNING_KEY).sign(&body);

    let (status, json) = send(&t.app, signed_post(body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["logs"], 2);
    assert_eq!(json["applied"], 1);
    assert_eq!(json["failed"], 1);
}

#[tokio::test]
async fn test_unparseable_activity_does_not_reject_delivery() {
    let t = default_app();
    let token = addr(0xaa);
    let group = t.harness.create_group(token, addr(0x01), 100, "1000", "10", "1000").await;

    let good = purchase_log(token, addr(0xb1), "1.0", "100", "0.011", Trade::at(120, 0));
    let mut bad = activity_for(&good);
    bad["log"]["address"] = json!("not-an-address");
    let body = webhook_body(vec![bad, activity_for(&good)]);
    let signature = SignatureVerifier::new(SIGNING_KEY).sign(&body);

    let (status, json) = send(&t.app, signed_post(body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["logs"], 2);
    assert_eq!(json["applied"], 1);
    assert_eq!(json["failed"], 1);

    let after = t.harness.store.get_group(group.id).await.unwrap().unwrap();
    assert_eq!(after.total_supply, amount("1100"));
}

#[tokio::test]
async fn test_webhook_applies_logs_in_chain_order() {
    let t = default_app();
    let token = addr(0xaa);
    let group = t.harness.create_group(token, addr(0x01), 100, "1000", "10", "1000").await;

    let first = purchase_log(token, addr(0xb1), "1.0", "100", "0.011", Trade::at(121, 0));
    let second = purchase_log(token, addr(0xb2), "1.0", "100", "0.012", Trade::at(121, 1));
    let body = webhook_body(vec![activity_for(&second), activity_for(&first)]);
    let signature = SignatureVerifier::new(SIGNING_KEY).sign(&body);

    let (status, json) = send(&t.app, signed_post(body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["applied"], 2);
    assert_eq!(json["failed"], 0);

    let after = t.harness.store.get_group(group.id).await.unwrap().unwrap();
    assert_eq!(after.total_supply, amount("1200"));
    assert_eq!(after.member_count, 3);
    // Price comes from the later log even though it was delivered first
    assert_eq!(after.token_price, amount("0.012"));
}

#[tokio::test]
async fn test_missing_signing_key_depends_on_environment() {
    let body = webhook_body(vec![]);

    let dev = build_app(Environment::Development, None, None);
    let (status, json) = send(&dev.app, signed_post(body.clone(), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let prod = build_app(Environment::Production, None, Some(CRON_SECRET));
    let (status, _) = send(&prod.app, signed_post(body, None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let t = default_app();
    let body = b"{not json".to_vec();
    let signature = SignatureVerifier::new(SIGNING_KEY).sign(&body);
    let (status, _) = send(&t.app, signed_post(body, Some(signature))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_health() {
    let t = default_app();
    let (status, json) = send(&t.app, get("/webhooks/alchemy")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["chainId"], CHAIN_ID);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_cron_requires_bearer_secret() {
    let t = default_app();
    let token = addr(0xaa);
    let group = t.harness.create_group(token, addr(0x01), 100, "1000", "0", "1000").await;
    t.harness
        .chain
        .push_log(purchase_log(token, addr(0xb1), "0.1", "10", "0.0101", Trade::at(150, 0)));
    t.harness.chain.set_head(300);

    let (status, _) = send(&t.app, get("/cron/index-groups")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/cron/index-groups")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&t.app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let authorized = Request::builder()
        .method("POST")
        .uri("/cron/index-groups")
        .header("authorization", format!("Bearer {}", CRON_SECRET))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&t.app, authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["currentBlock"], 300);
    assert_eq!(json["groupsProcessed"], 1);
    assert_eq!(json["results"][0]["groupId"], group.id.to_string());
    assert_eq!(json["results"][0]["eventsProcessed"], 1);
    assert!(json["results"][0].get("error").is_none());
}

#[tokio::test]
async fn test_cron_without_secret_in_development() {
    let t = build_app(Environment::Development, None, None);
    let (status, json) = send(&t.app, get("/cron/index-groups")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["groupsProcessed"], 0);
}

#[tokio::test]
async fn test_read_model_endpoints() {
    let t = default_app();
    let token = addr(0xaa);
    t.harness.create_group(token, addr(0x01), 100, "1000", "10", "1000").await;
    let log = purchase_log(token, addr(0xb1), "1.0", "100", "0.011", Trade::at(120, 2));
    t.harness.reconciler.process_log(&log).await.unwrap();

    let (status, groups) = send(&t.app, get("/groups")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(groups.as_array().unwrap().len(), 1);

    let (status, group) = send(&t.app, get(&format!("/groups/{}", token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["token_symbol"], "GRDN");
    assert_eq!(group["total_supply"], "1100.0");

    let (status, members) = send(&t.app, get(&format!("/groups/{}/members", token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members.as_array().unwrap().len(), 2);

    let (status, activity) = send(&t.app, get(&format!("/groups/{}/activity?limit=1", token))).await;
    assert_eq!(status, StatusCode::OK);
    let activity = activity.as_array().unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0]["event_type"], "token_buy");

    let (status, _) = send(&t.app, get(&format!("/groups/{}", addr(0xcc)))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, get("/groups/not-an-address")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_quote_endpoint() {
    let t = default_app();
    let token = addr(0xaa);
    t.harness.create_group(token, addr(0x01), 100, "0", "0", "0").await;

    let (status, quote) = send(&t.app, get(&format!("/groups/{}/quote?side=buy&amount=1", token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["side"], "buy");
    assert_eq!(quote["fee"], "0.02");
    assert_eq!(quote["amountOut"], "98.0");
    assert_eq!(quote["newPrice"], "0.0105");

    let (status, _) = send(&t.app, get(&format!("/groups/{}/quote?side=sell&amount=10", token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, get(&format!("/groups/{}/quote?side=buy&amount=abc", token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_onchain_endpoint_reads_live_state() {
    let t = default_app();
    let token = addr(0xaa);
    t.harness.create_group(token, addr(0x01), 100, "1000", "0", "1000").await;

    // currentPrice reverts until set
    let (status, _) = send(&t.app, get(&format!("/groups/{}/onchain", token))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    t.harness.chain.set_price(token, amount("0.012"));
    t.harness.chain.set_charter(token, "bafycharter");
    let (status, json) = send(&t.app, get(&format!("/groups/{}/onchain", token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["chainId"], CHAIN_ID);
    assert_eq!(json["totalSupply"], "1000.0");
    assert_eq!(json["currentPrice"], "0.012");
    assert_eq!(json["charterCid"], "bafycharter");
}

#[tokio::test]
async fn test_health() {
    let t = default_app();
    let (status, json) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}
