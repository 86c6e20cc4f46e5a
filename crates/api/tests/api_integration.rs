//! API integration tests.
//!
//! These tests drive the full router over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::redundant_clone)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use futures::StreamExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use unirank_api::{middleware::AppState, router};
use unirank_common::config::{IdentityConfig, VotingConfig};
use unirank_core::{InvalidationBus, MemoryPollStore, MemoryProgressStore, NoOpEventPublisher};

const ADMIN_TOKEN: &str = "test-admin-token";

/// Create test app state over in-memory storage.
fn create_test_state() -> AppState {
    AppState::new(
        Arc::new(MemoryPollStore::new()),
        Arc::new(MemoryProgressStore::new()),
        Arc::new(NoOpEventPublisher),
        InvalidationBus::new(),
        &VotingConfig::default(),
        IdentityConfig::default(),
    )
    .with_admin_token(Some(ADMIN_TOKEN.to_string()))
}

fn create_test_router() -> Router {
    router(create_test_state())
}

fn voter(n: u32) -> String {
    format!("v1-{n:032x}")
}

struct TestResponse {
    status: StatusCode,
    set_cookie: Option<String>,
    body: Value,
}

async fn post(app: &Router, uri: &str, body: Value, identity: Option<&str>) -> TestResponse {
    let headers: Vec<(&str, &str)> = identity
        .map(|identity| vec![("X-Voter-Identity", identity)])
        .unwrap_or_default();
    send(app, uri, body, &headers).await
}

async fn post_as_admin(app: &Router, uri: &str, body: Value) -> TestResponse {
    let bearer = format!("Bearer {ADMIN_TOKEN}");
    send(app, uri, body, &[("Authorization", bearer.as_str())]).await
}

async fn send(app: &Router, uri: &str, body: Value, headers: &[(&str, &str)]) -> TestResponse {
    let mut request = Request::builder()
        .uri(uri)
        .method("POST")
        .header("Content-Type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    TestResponse {
        status,
        set_cookie,
        body,
    }
}

fn poll_body(category: &str) -> Value {
    json!({
        "question": "Best dining hall?",
        "category": category,
        "options": [
            { "name": "North", "color": "#112233" },
            { "name": "South", "shortName": "S" }
        ]
    })
}

/// Create a two-option poll and return `(poll_id, [option ids])`.
async fn create_poll(app: &Router, category: &str) -> (String, Vec<String>) {
    let response = post_as_admin(app, "/api/polls/create", poll_body(category)).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);

    let data = &response.body["data"];
    let options = data["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect();
    (data["id"].as_str().unwrap().to_string(), options)
}

#[tokio::test]
async fn test_healthz() {
    let app = create_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_unknown_endpoint_returns_404() {
    let app = create_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/nonexistent/endpoint")
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_and_show_poll() {
    let app = create_test_router();
    let (poll_id, options) = create_poll(&app, "food").await;
    assert_eq!(options.len(), 2);

    let response = post(&app, "/api/polls/show", json!({ "pollId": poll_id }), None).await;

    assert_eq!(response.status, StatusCode::OK);
    let data = &response.body["data"];
    assert_eq!(data["category"], "food");
    assert_eq!(data["isActive"], true);
    assert_eq!(data["options"][1]["shortName"], "S");
    assert!(data["options"][1].get("color").is_none());
}

#[tokio::test]
async fn test_create_poll_with_one_option_is_rejected() {
    let app = create_test_router();

    let response = post_as_admin(
        &app,
        "/api/polls/create",
        json!({ "question": "Q", "category": "food", "options": [{ "name": "Only" }] }),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_show_missing_poll_returns_404() {
    let app = create_test_router();

    let response = post(&app, "/api/polls/show", json!({ "pollId": "missing" }), None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"]["code"], "POLL_NOT_FOUND");
}

#[tokio::test]
async fn test_results_are_locked_until_voted() {
    let app = create_test_router();
    let (poll_id, options) = create_poll(&app, "food").await;
    let me = voter(1);

    let before = post(&app, "/api/polls/results", json!({ "pollId": poll_id }), Some(&me)).await;
    assert_eq!(before.status, StatusCode::OK);
    assert_eq!(before.body["data"]["gate"], "locked");
    assert!(before.body["data"].get("results").is_none());

    let vote = post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": poll_id, "optionId": options[0] }),
        Some(&me),
    )
    .await;
    assert_eq!(vote.status, StatusCode::OK);
    assert_eq!(vote.body["data"]["status"], "recorded");
    assert_eq!(vote.body["data"]["receipt"]["identity"], me);

    let after = post(&app, "/api/polls/results", json!({ "pollId": poll_id }), Some(&me)).await;
    assert_eq!(after.body["data"]["gate"], "unlocked");
    let results = &after.body["data"]["results"];
    assert_eq!(results["totalVotes"], 1);
    assert_eq!(results["results"][0]["optionId"], options[0].as_str());
    assert_eq!(results["results"][0]["percentage"], 100.0);
    assert_eq!(results["results"][1]["voteCount"], 0);

    let stranger = post(
        &app,
        "/api/polls/results",
        json!({ "pollId": poll_id }),
        Some(&voter(2)),
    )
    .await;
    assert_eq!(stranger.body["data"]["gate"], "locked");
}

#[tokio::test]
async fn test_second_vote_reports_already_voted() {
    let app = create_test_router();
    let (poll_id, options) = create_poll(&app, "food").await;
    let me = voter(7);

    post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": poll_id, "optionId": options[0] }),
        Some(&me),
    )
    .await;
    let again = post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": poll_id, "optionId": options[1] }),
        Some(&me),
    )
    .await;

    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body["data"]["status"], "alreadyVoted");
    assert!(again.body["data"].get("receipt").is_none());

    let results = post(&app, "/api/polls/results", json!({ "pollId": poll_id }), Some(&me)).await;
    let rows = &results.body["data"]["results"]["results"];
    assert_eq!(rows[0]["optionId"], options[0].as_str());
    assert_eq!(rows[0]["voteCount"], 1);
    assert_eq!(rows[1]["voteCount"], 0);
}

#[tokio::test]
async fn test_vote_for_foreign_option_is_invalid() {
    let app = create_test_router();
    let (poll_id, _) = create_poll(&app, "food").await;

    let response = post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": poll_id, "optionId": "not-an-option" }),
        Some(&voter(3)),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"]["code"], "INVALID_VOTE");
    assert_eq!(response.body["error"]["retryable"], false);
}

#[tokio::test]
async fn test_vote_on_closed_poll_is_invalid() {
    let app = create_test_router();
    let (poll_id, options) = create_poll(&app, "food").await;

    let closed = post_as_admin(&app, "/api/polls/close", json!({ "pollId": poll_id })).await;
    assert_eq!(closed.body["data"]["isActive"], false);

    let response = post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": poll_id, "optionId": options[0] }),
        Some(&voter(4)),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_identity_is_issued_once() {
    let app = create_test_router();

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/identity/resolve")
                .method("POST")
                .header(header::USER_AGENT, "Mozilla/5.0 (test)")
                .header(header::ACCEPT_LANGUAGE, "en-GB,en;q=0.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let cookie = first
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("unirank_voter=fb-"));
    assert!(cookie.contains("HttpOnly"));

    let bytes = to_bytes(first.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["fallback"], true);
    assert_eq!(body["data"]["issued"], true);

    let pair = cookie.split(';').next().unwrap().to_string();
    let second = app
        .oneshot(
            Request::builder()
                .uri("/api/identity/resolve")
                .method("POST")
                .header(header::COOKIE, pair.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(second.headers().get(header::SET_COOKIE).is_none());
    let bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["issued"], false);
    assert_eq!(
        body["data"]["identity"],
        pair.trim_start_matches("unirank_voter=")
    );
}

#[tokio::test]
async fn test_device_signals_give_primary_identity() {
    let app = create_test_router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/identity/resolve")
                .method("POST")
                .header(
                    "X-Device-Signals",
                    r#"{"canvas":"c1","webgl":"g1","fonts":"f1","timezone":"Europe/Berlin"}"#,
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["data"]["identity"].as_str().unwrap().starts_with("v1-"));
    assert_eq!(body["data"]["fallback"], false);
}

#[tokio::test]
async fn test_has_voted_and_progress() {
    let app = create_test_router();
    let (poll_id, options) = create_poll(&app, "food").await;
    let me = voter(9);

    let before = post(&app, "/api/polls/has-voted", json!({ "pollId": poll_id }), Some(&me)).await;
    assert_eq!(before.body["data"]["hasVoted"], false);

    post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": poll_id, "optionId": options[1] }),
        Some(&me),
    )
    .await;

    let after = post(&app, "/api/polls/has-voted", json!({ "pollId": poll_id }), Some(&me)).await;
    assert_eq!(after.body["data"]["hasVoted"], true);

    let progress = post(&app, "/api/progress/show", json!({}), Some(&me)).await;
    assert_eq!(progress.body["data"]["identity"], me);
    assert_eq!(
        progress.body["data"]["votes"][&poll_id]["optionId"],
        options[1].as_str()
    );

    let rebuilt = post(&app, "/api/progress/reconcile", json!({}), Some(&me)).await;
    assert_eq!(rebuilt.status, StatusCode::OK);
    assert_eq!(rebuilt.body["data"], progress.body["data"]);
}

#[tokio::test]
async fn test_category_gate_tracks_completion() {
    let app = create_test_router();
    let (first, first_options) = create_poll(&app, "dorms").await;
    create_poll(&app, "dorms").await;
    let me = voter(11);

    let locked = post(&app, "/api/gate/category", json!({ "category": "dorms" }), Some(&me)).await;
    assert_eq!(locked.body["data"]["state"], "locked");
    assert_eq!(locked.body["data"]["pollCount"], 2);

    post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": first, "optionId": first_options[0] }),
        Some(&me),
    )
    .await;

    let unlocked = post(&app, "/api/gate/category", json!({ "category": "dorms" }), Some(&me)).await;
    assert_eq!(unlocked.body["data"]["state"], "unlocked");
    assert_eq!(unlocked.body["data"]["votedCount"], 1);
    assert_eq!(unlocked.body["data"]["completionPercent"], 50.0);

    let poll_gate = post(&app, "/api/gate/poll", json!({ "pollId": first }), Some(&me)).await;
    assert_eq!(poll_gate.body["data"]["state"], "unlocked");

    let missing = post(&app, "/api/gate/poll", json!({ "pollId": "missing" }), Some(&me)).await;
    assert_eq!(missing.body["data"]["state"], "empty");
}

#[tokio::test]
async fn test_list_polls_by_category() {
    let app = create_test_router();
    create_poll(&app, "food").await;
    create_poll(&app, "dorms").await;

    let response = post(&app, "/api/polls/list", json!({ "category": "food" }), None).await;

    let polls = response.body["data"].as_array().unwrap();
    assert_eq!(polls.len(), 1);
    assert_eq!(polls[0]["category"], "food");
    assert!(polls[0].get("options").is_none());
}

#[tokio::test]
async fn test_locked_results_stream_sends_gate_and_ends() {
    let app = create_test_router();
    let (poll_id, _) = create_poll(&app, "food").await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/streaming/polls/{poll_id}/results"))
                .method("GET")
                .header("X-Voter-Identity", voter(5))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap_or(""));
    assert!(content_type.unwrap().contains("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: gate"));
    assert!(text.contains(r#""state":"locked""#));
    assert!(!text.contains("event: results"));
}

#[tokio::test]
async fn test_poll_administration_requires_admin_token() {
    let app = create_test_router();
    let (poll_id, _) = create_poll(&app, "food").await;

    let anonymous = post(&app, "/api/polls/create", poll_body("food"), Some(&voter(1))).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.body["error"]["code"], "UNAUTHORIZED");

    let wrong = send(
        &app,
        "/api/polls/close",
        json!({ "pollId": poll_id }),
        &[("Authorization", "Bearer not-the-token")],
    )
    .await;
    assert_eq!(wrong.status, StatusCode::FORBIDDEN);
    assert_eq!(wrong.body["error"]["code"], "FORBIDDEN");

    let shown = post(&app, "/api/polls/show", json!({ "pollId": poll_id }), None).await;
    assert_eq!(shown.body["data"]["isActive"], true);

    let listed = post(&app, "/api/polls/list", json!({}), None).await;
    assert_eq!(listed.body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_poll_administration_disabled_without_token() {
    let app = router(create_test_state().with_admin_token(None));

    let response = send(
        &app,
        "/api/polls/create",
        poll_body("food"),
        &[("Authorization", "Bearer anything")],
    )
    .await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unlocked_results_stream_sends_results_and_tears_down() {
    let state = create_test_state();
    let bus = state.bus.clone();
    let app = router(state);
    let (poll_id, options) = create_poll(&app, "food").await;
    let me = voter(6);
    post(
        &app,
        "/api/polls/vote",
        json!({ "pollId": poll_id, "optionId": options[0] }),
        Some(&me),
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/streaming/polls/{poll_id}/results"))
                .method("GET")
                .header("X-Voter-Identity", me.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let mut text = String::new();
    while !text.contains(r#""totalVotes":1"#) {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("results event within the timeout")
            .expect("stream still open")
            .unwrap();
        text.push_str(std::str::from_utf8(&chunk).unwrap());
    }

    let gate_at = text.find("event: gate").unwrap();
    let results_at = text.find("event: results").unwrap();
    assert!(gate_at < results_at);
    assert!(text.contains(r#""state":"unlocked""#));
    assert_eq!(bus.subscriber_count(&poll_id).await, 1);

    drop(body);
    let mut remaining = bus.subscriber_count(&poll_id).await;
    for _ in 0..100 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        remaining = bus.subscriber_count(&poll_id).await;
    }
    assert_eq!(remaining, 0);
}
