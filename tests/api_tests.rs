use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::{configure_area, spawn_app, API_KEY};

async fn send(app: &common::TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("X-Api-Key", API_KEY);
    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn mission(code: &str) -> Value {
    json!({
        "missionCode": code,
        "areaKey": "A1",
        "priority": 5,
        "steps": [
            {"position": "N101", "actions": {"pickUp": true}},
            {"position": "WP-3", "passStrategy": "MANUAL"},
            {"position": "N205", "actions": {"putDown": true}}
        ]
    })
}

#[tokio::test]
async fn test_root_is_public() {
    let app = spawn_app();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_api_key_is_unauthorized() {
    let app = spawn_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/missions/stats")
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_enqueue_then_duplicate() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    let (status, body) = send(&app, "POST", "/missions", Some(mission("M-1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["executeImmediately"], true);
    assert!(body["queueId"].is_string());

    let (status, body) = send(&app, "POST", "/missions", Some(mission("M-1"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_enqueue_validation_error() {
    let app = spawn_app();
    let (status, _) = send(
        &app,
        "POST",
        "/missions",
        Some(json!({"missionCode": "M-1", "areaKey": "A1", "steps": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_queue_position_and_stats() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    send(&app, "POST", "/missions", Some(mission("M-1"))).await;
    let (_, body) = send(&app, "POST", "/missions", Some(mission("M-2"))).await;
    assert_eq!(body["executeImmediately"], false);
    assert_eq!(body["queuePosition"], 1);

    let (status, stats) = send(&app, "GET", "/missions/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["queuedCount"], 1);
    assert_eq!(stats["processingCount"], 1);
    assert_eq!(stats["totalSlots"], 1);
    assert_eq!(stats["availableSlots"], 0);
}

#[tokio::test]
async fn test_cancel_via_delete() {
    let app = spawn_app();
    configure_area(&app, "A1", 1, true, 0).await;

    let (_, created) = send(&app, "POST", "/missions", Some(mission("M-1"))).await;
    let id = created["queueId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "DELETE", &format!("/missions/{id}?mode=REDIRECT&reason=aisle"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = send(&app, "DELETE", &format!("/missions/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "DELETE", &format!("/missions/{}", uuid::Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resume_and_waypoint_listing() {
    let app = spawn_app();
    app.controller.set_waiting(vec![mission_control::remote::models::WaitingMission {
        mission_code: "M-1".into(),
        current_position: "WP-3".into(),
        robot_id: "R1".into(),
        battery_level: None,
        waiting_since: None,
    }]);
    app.state.reconciler.tick().await.unwrap();

    let (status, body) = send(&app, "GET", "/missions/M-1/waypoints", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "waitingForResume");
    assert_eq!(body["visits"][0]["waypointCode"], "WP-3");
    assert_eq!(body["pauses"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "POST", "/missions/M-1/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "resumed");

    let (_, body) = send(&app, "POST", "/missions/M-1/resume", None).await;
    assert_eq!(body["outcome"], "alreadyResumed");
}

#[tokio::test]
async fn test_register_schedule_and_area() {
    let app = spawn_app();

    let (status, body) = send(
        &app,
        "PUT",
        "/areas/A9",
        Some(json!({"maxConcurrentRobots": 3, "maxOpportunisticChain": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["maxConcurrentRobots"], 3);
    assert_eq!(body["queueingEnabled"], true);

    let (status, _) = send(&app, "PUT", "/areas/A9", Some(json!({"maxConcurrentRobots": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        "/schedules",
        Some(json!({
            "name": "night patrol",
            "triggerType": "recurring",
            "cronExpression": "0 22 * * *",
            "timezone": "Europe/Berlin",
            "template": {"areaKey": "A9", "steps": [{"position": "N101"}]}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["nextRunAt"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/schedules",
        Some(json!({
            "name": "broken",
            "triggerType": "recurring",
            "cronExpression": "0 22 * * *",
            "timezone": "Nowhere/Special",
            "template": {"areaKey": "A9", "steps": [{"position": "N101"}]}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
