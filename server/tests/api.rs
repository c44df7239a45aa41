//! Integration tests over the assembled Axum router, exercised without
//! binding a socket per `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use daw_compiler::OpcodeRegistry;
use daw_server::api::AppState;
use daw_server::config::BridgeConfig;
use daw_server::persistence::PersistenceGateway;
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> axum::Router {
    let registry = Arc::new(OpcodeRegistry::bundled());
    let gateway = Arc::new(PersistenceGateway::open_in_memory().unwrap());
    let state = AppState::new(registry, gateway, BridgeConfig::default());
    daw_server::build_router(state, &[])
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app();
    let response = app.oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn patch_round_trips_through_the_http_api() {
    let app = test_app();
    let patch = daw_core::patch::Patch::new("integration-test-patch");
    let body = serde_json::to_vec(&patch).unwrap();

    let create = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/api/patches").header("content-type", "application/json").body(Body::from(body)).unwrap())
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::OK);

    let get = app
        .oneshot(Request::builder().uri(format!("/api/patches/{}", patch.id)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_patch_returns_404_with_envelope() {
    let app = test_app();
    let id = uuid::Uuid::new_v4();
    let response = app.oneshot(Request::builder().uri(format!("/api/patches/{id}")).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["kind"], "persistence");
}

#[tokio::test]
async fn creating_a_session_with_duplicate_channels_is_rejected() {
    let app = test_app();
    let patch_id = uuid::Uuid::new_v4();
    let body = serde_json::json!({
        "assignments": [
            { "patch_id": patch_id, "midi_channel": 0 },
            { "patch_id": patch_id, "midi_channel": 0 },
        ]
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sessions")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
