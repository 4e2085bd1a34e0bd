//! Router tests driven through `tower::ServiceExt::oneshot`, over offline
//! services and an in-memory store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use engine::{enrichment_graph, Executor, RunController};
use serde_json::{json, Value};
use steps::enrichment::{names, ValidationPolicy};
use steps::offline::offline_services;
use store::{HybridSearcher, MemoryStore, SearchConfig};
use tower::ServiceExt;

use crate::{classify_body_limit, router, AppState};

const MIB: usize = 1024 * 1024;

fn app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let services = offline_services(store.clone());
    let graph = enrichment_graph(&services, ValidationPolicy::default()).unwrap();
    let controller = Arc::new(RunController::new(graph, Executor::default()));
    let searcher = Arc::new(HybridSearcher::new(
        store.clone(),
        services.embedder.clone(),
        SearchConfig::default(),
    ));
    let state = AppState::new(controller, searcher, ValidationPolicy::default().max_bytes);
    (router(state), store)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

fn classify_body(mime: &str, hint: &str) -> Value {
    json!({
        "file": STANDARD.encode(b"\x89PNG slab photo"),
        "mimeType": mime,
        "hint": hint,
    })
}

fn png_of(size: usize) -> Value {
    let mut bytes = b"\x89PNG".to_vec();
    bytes.resize(size, 0);
    json!({ "file": STANDARD.encode(&bytes), "mimeType": "image/png", "hint": "Mina Park" })
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = app();
    let request = Request::get("/api/v1/health").body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn classify_runs_the_pipeline_and_stores_the_card() {
    let (app, store) = app();
    let (status, body) = post(app, "/api/v1/classify", classify_body("image/png", "Jordan Ellis")).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["validation"]["isValid"], true);
    assert_eq!(body["classification"]["player"], "Jordan Ellis");
    assert!(body["derivedImage"].is_string());
    assert!(body["narrationRef"].is_string());
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn step_failure_names_the_step() {
    let (app, store) = app();
    let (status, body) = post(app, "/api/v1/classify", classify_body("image/gif", "x")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["step"], names::VALIDATE_FILE);
    assert_eq!(body["error"], "unsupported file type: image/gif");
    assert_eq!(body["partial"], json!({}));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn photo_sized_artifact_is_classified() {
    let (app, store) = app();
    let (status, body) = post(app, "/api/v1/classify", png_of(4 * MIB)).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["classification"]["player"], "Mina Park");
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn oversized_artifact_is_rejected_by_file_validation() {
    let (app, store) = app();
    let (status, body) = post(app, "/api/v1/classify", png_of(6 * MIB)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["step"], names::VALIDATE_FILE);
    assert_eq!(
        body["error"],
        format!("artifact of {} bytes exceeds size limit of 5MB", 6 * MIB)
    );
    assert!(store.is_empty().await);
}

#[test]
fn classify_body_limit_covers_base64_of_twice_the_policy() {
    let max = ValidationPolicy::default().max_bytes;
    let limit = classify_body_limit(max);
    assert!(limit > (2 * max).div_ceil(3) * 4);
    assert!(limit < 3 * max);
    assert_eq!(classify_body_limit(3), 8 + 64 * 1024);
}

#[tokio::test]
async fn undecodable_file_is_a_bad_request() {
    let (app, _) = app();
    let (status, body) = post(
        app,
        "/api/v1/classify",
        json!({ "file": "not base64!!", "mimeType": "image/png" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("step").is_none());
}

#[tokio::test]
async fn search_finds_a_classified_card() {
    let (app, _) = app();
    let (status, _) = post(
        app.clone(),
        "/api/v1/classify",
        classify_body("image/png", "Mina Park"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(app, "/api/v1/search", json!({ "question": "Mina Park" })).await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["player"], "Mina Park");
    assert!(results[0]["hybridScore"].is_number());
}

#[tokio::test]
async fn search_rejects_missing_question_and_bad_weight() {
    let (app, _) = app();
    let (status, body) = post(app.clone(), "/api/v1/search", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing or invalid question");

    let (status, _) = post(
        app,
        "/api/v1/search",
        json!({ "question": "prizm", "textWeight": 1.5 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
