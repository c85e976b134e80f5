use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use seat_lock_service::{
    app,
    clock::ManualClock,
    config::LockConfig,
    middleware::HOLDER_HEADER,
    services::seat_lock::SeatLockManager,
    store::MemoryLockStore,
    AppState,
};

fn test_app() -> (Router, ManualClock) {
    let clock = ManualClock::default();
    let manager = SeatLockManager::new(
        Arc::new(MemoryLockStore::new()),
        Arc::new(clock.clone()),
        LockConfig::default(),
    );
    (app(AppState::new(Arc::new(manager))), clock)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, holder: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(holder) = holder {
        builder = builder.header(HOLDER_HEADER, holder);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn acquire(app: &Router, holder: &str, seats: &[&str]) -> (StatusCode, Value) {
    send(
        app,
        json_request(
            "POST",
            "/api/locks",
            Some(holder),
            json!({ "trip_id": "T1", "seat_numbers": seats }),
        ),
    )
    .await
}

#[tokio::test]
async fn hold_confirm_flow_over_http() {
    let (app, _) = test_app();

    let (status, body) = acquire(&app, "U1", &["A1", "A2"]).await;
    assert_eq!(status, StatusCode::CREATED);
    let lock_id = body["lock_id"].as_str().unwrap().to_string();

    let (status, body) = acquire(&app, "U2", &["A2", "A3"]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["seats"], json!(["A2"]));

    let (status, body) = send(&app, get("/api/trips/T1/availability?seats=A3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], json!(true));

    let (status, _) = send(
        &app,
        json_request("PATCH", &format!("/api/locks/{lock_id}/confirm"), None, json!({ "booking_id": "BK-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get(&format!("/api/locks/{lock_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("CONFIRMED"));
    assert_eq!(body["booking_id"], json!("BK-1"));

    let (status, body) = send(
        &app,
        json_request("PATCH", &format!("/api/locks/{lock_id}/confirm"), None, json!({})),
    )
    .await;
    assert_eq!(status.as_u16(), 419);
    assert_eq!(body["status"], json!("CONFIRMED"));

    let (status, body) = send(&app, get("/api/trips/T1/locks")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn confirm_accepts_empty_body() {
    let (app, _) = test_app();
    let (_, body) = acquire(&app, "U1", &["D1"]).await;
    let lock_id = body["lock_id"].as_str().unwrap().to_string();

    let bare = Request::builder()
        .method("PATCH")
        .uri(format!("/api/locks/{lock_id}/confirm"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, bare).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("CONFIRMED"));

    let (_, body) = send(&app, get(&format!("/api/locks/{lock_id}"))).await;
    assert_eq!(body["status"], json!("CONFIRMED"));
    assert_eq!(body["booking_id"], Value::Null);
}

#[tokio::test]
async fn release_is_idempotent_over_http() {
    let (app, _) = test_app();
    let (_, body) = acquire(&app, "U1", &["B1"]).await;
    let lock_id = body["lock_id"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            json_request("PATCH", &format!("/api/locks/{lock_id}/release"), None, json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = acquire(&app, "U2", &["B1"]).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn sweep_endpoint_reports_released_count() {
    let (app, clock) = test_app();
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/locks",
            Some("U1"),
            json!({ "trip_id": "T1", "seat_numbers": ["C1"], "ttl_seconds": 5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    clock.advance(chrono::Duration::seconds(10));

    let (status, body) = send(&app, json_request("POST", "/api/locks/sweep", None, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], json!(1));

    let (_, body) = send(&app, get("/api/stats/locks")).await;
    assert_eq!(body["expired_unswept"], json!(0));
}

#[tokio::test]
async fn rejects_bad_requests() {
    let (app, _) = test_app();

    let (status, _) = send(
        &app,
        json_request("POST", "/api/locks", None, json!({ "trip_id": "T1", "seat_numbers": ["A1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = acquire(&app, "U1", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_request"));

    let (status, _) = acquire(&app, "U1", &["A1", "A1"]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let (status, body) = send(
        &app,
        json_request("PATCH", &format!("/api/locks/{missing}/release"), None, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("lock_not_found"));
}
