// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Router tests: task delivery guard, job API, activity listing.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use strava_sync::middleware::auth::create_jwt;
use strava_sync::middleware::tasks_auth::QUEUE_NAME_HEADER;
use strava_sync::models::{SyncJobParams, SyncJobStatus};
use tower::ServiceExt;

mod common;
use common::{FakeStrava, TestEnv, USER_ID};

const JWT_KEY: &[u8] = b"test_jwt_key_32_bytes_minimum!!";

fn bearer(user_id: u64) -> String {
    format!("Bearer {}", create_jwt(user_id, JWT_KEY).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn sync_task_request(queue_header: Option<&str>, payload: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/tasks/sync-user")
        .header("content-type", "application/json");
    if let Some(queue) = queue_header {
        builder = builder.header(QUEUE_NAME_HEADER, queue);
    }
    builder
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn health_check_ok() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, _) = env.app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn task_without_queue_header_forbidden() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, _) = env.app();
    let payload = json!({ "sync_job_id": "x", "user_id": USER_ID });

    let response = app.oneshot(sync_task_request(None, &payload)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn task_with_wrong_queue_forbidden() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, _) = env.app();
    let payload = json!({ "sync_job_id": "x", "user_id": USER_ID });

    let response = app
        .oneshot(sync_task_request(Some("some-other-queue"), &payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn task_for_missing_job_is_acknowledged() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, state) = env.app();
    let payload = json!({ "sync_job_id": "gone", "user_id": USER_ID });

    let response = app
        .oneshot(sync_task_request(
            Some(&state.config.task_queue_name),
            &payload,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn task_delivery_runs_job() {
    let env = TestEnv::new(FakeStrava::with_count(4));
    let (app, state) = env.app();
    let job = env
        .orchestrator
        .create_sync_job(USER_ID, SyncJobParams::default())
        .await
        .unwrap();
    let payload = serde_json::to_value(&env.queue.sync_tasks()[0]).unwrap();

    let response = app
        .oneshot(sync_task_request(
            Some(&state.config.task_queue_name),
            &payload,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let job = env.job(&job.id).await;
    assert_eq!(job.status, SyncJobStatus::Completed);
    assert_eq!(job.completed_result.unwrap().inserted_count, 4);
}

#[tokio::test]
async fn task_whose_status_write_fails_asks_for_redelivery() {
    let env = TestEnv::new(FakeStrava::with_count(1));
    let (app, state) = env.app();
    env.orchestrator
        .create_sync_job(USER_ID, SyncJobParams::default())
        .await
        .unwrap();
    env.jobs
        .fail_updates
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let payload = serde_json::to_value(&env.queue.sync_tasks()[0]).unwrap();

    let response = app
        .oneshot(sync_task_request(
            Some(&state.config.task_queue_name),
            &payload,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn job_api_requires_jwt() {
    let env = TestEnv::new(FakeStrava::with_count(0));

    for (method, uri) in [
        ("GET", "/api/sync-jobs"),
        ("POST", "/api/sync-jobs"),
        ("GET", "/api/sync-jobs/abc"),
        ("GET", "/api/activities"),
    ] {
        let (app, _) = env.app();
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn invalid_jwt_rejected() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, _) = env.app();
    let forged = create_jwt(USER_ID, b"some-other-signing-key-entirely").unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sync-jobs")
                .header("authorization", format!("Bearer {}", forged))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_and_read_back_sync_job() {
    let env = TestEnv::new(FakeStrava::with_count(0));

    let (app, _) = env.app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync-jobs")
                .header("authorization", bearer(USER_ID))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"refresh_last_days": 7}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "created");
    assert_eq!(created["stuck"], false);
    assert_eq!(created["params"]["refresh_last_days"], 7);
    let id = created["id"].as_str().unwrap().to_string();

    let (app, _) = env.app();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/sync-jobs/{}", id))
                .header("authorization", bearer(USER_ID))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], id.as_str());

    let (app, _) = env.app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sync-jobs")
                .header("authorization", bearer(USER_ID))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let list = body_json(response).await;
    assert_eq!(list["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_without_body_uses_defaults() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, _) = env.app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync-jobs")
                .header("authorization", bearer(USER_ID))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(env.queue.sync_tasks()[0].params, SyncJobParams::default());
}

#[tokio::test]
async fn create_with_invalid_params_is_bad_request() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, _) = env.app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync-jobs")
                .header("authorization", bearer(USER_ID))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"refresh_last_days": 0}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "bad_request");
}

#[tokio::test]
async fn create_for_unknown_user_is_not_found() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let (app, _) = env.app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync-jobs")
                .header("authorization", bearer(777))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn other_users_job_is_hidden() {
    let env = TestEnv::new(FakeStrava::with_count(0));
    let job = env
        .orchestrator
        .create_sync_job(USER_ID, SyncJobParams::default())
        .await
        .unwrap();
    let (app, _) = env.app();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/sync-jobs/{}", job.id))
                .header("authorization", bearer(USER_ID + 1))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn activities_listed_after_sync() {
    let env = TestEnv::new(FakeStrava::with_count(3));
    env.engine
        .sync_user(USER_ID, &SyncJobParams::default())
        .await
        .unwrap();
    let (app, _) = env.app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/activities?per_page=2")
                .header("authorization", bearer(USER_ID))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let activities = body["activities"].as_array().unwrap();
    assert_eq!(activities.len(), 2);
    assert_eq!(activities[0]["id"], 3);
    assert_eq!(activities[0]["name"], "Activity 3");
    assert_eq!(activities[0]["has_details"], true);
}
