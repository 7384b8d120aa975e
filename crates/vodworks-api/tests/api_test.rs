//! End-to-end tests over the HTTP surface with a scripted executor.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use vodworks_api::{router, AppState};
use vodworks_core::{EventBus, SchedulerConfig};
use vodworks_resilience::{BreakerRegistry, ServiceRegistry};
use vodworks_scheduler::testing::{CapturingBus, MockExecutor, MockOutcome};
use vodworks_scheduler::{TaskQueue, TaskStore, WorkerPool};

async fn test_app(
    max_queue: usize,
    executor: Arc<MockExecutor>,
) -> (Arc<AppState>, Router, Arc<CapturingBus>) {
    let mut config = SchedulerConfig::default();
    config.max_queue_size = max_queue;
    config.worker_pool_size = 1;
    config.scaling.min_workers = 1;
    config.scaling.max_workers = 4;
    config.task_timeout_secs = 10;

    let store = Arc::new(TaskStore::new());
    let capture = Arc::new(CapturingBus::new());
    let bus: Arc<dyn EventBus> = capture.clone();
    let queue = Arc::new(TaskQueue::new(
        store.clone(),
        bus.clone(),
        config.max_queue_size,
    ));
    let pool = WorkerPool::new(
        queue.clone(),
        store.clone(),
        executor,
        bus.clone(),
        config.clone(),
    );
    pool.start().await;

    let state = Arc::new(AppState {
        config,
        store,
        queue,
        pool,
        breakers: Arc::new(BreakerRegistry::new(&SchedulerConfig::default().breaker_defaults)),
        discovery: ServiceRegistry::new(),
        bus,
        metrics_handle: None,
    });
    let app = router(state.clone());
    (state, app, capture)
}

fn submit_body(source: &str) -> Value {
    json!({
        "source": source,
        "profiles": [
            { "resolution": "1280x720", "bitrate_kbps": 2500, "container": "mp4" }
        ],
        "priority": 5
    })
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_submit_then_get_completes() {
    let (_state, app, _events) = test_app(10, MockExecutor::always_ok()).await;

    let (status, body) = request(&app, "POST", "/api/v1/tasks", Some(submit_body("s3://in/a.mov"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    let id = body["id"].as_str().unwrap().to_string();

    let uri = format!("/api/v1/tasks/{}", id);
    for _ in 0..100 {
        let (status, body) = request(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" {
            assert_eq!(body["progress"], 100.0);
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task never completed");
}

#[tokio::test]
async fn test_submit_rejects_invalid_payloads() {
    let (_state, app, _events) = test_app(10, MockExecutor::always_ok()).await;

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/tasks",
        Some(json!({ "source": "", "profiles": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_queue_full_returns_503() {
    let executor = MockExecutor::with_script(vec![MockOutcome::Hang]);
    let (_state, app, _events) = test_app(2, executor).await;

    // First submission is picked up by the lone (hanging) worker.
    let (status, _) = request(&app, "POST", "/api/v1/tasks", Some(submit_body("a"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The next two fill the queue; the one after that is shed.
    for source in ["b", "c"] {
        let (status, _) = request(&app, "POST", "/api/v1/tasks", Some(submit_body(source))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    let (status, body) = request(&app, "POST", "/api/v1/tasks", Some(submit_body("d"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "QUEUE_FULL");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn test_cancel_pending_then_conflict() {
    // Hang the worker on a first task so the second stays Pending.
    let executor = MockExecutor::with_script(vec![MockOutcome::Hang]);
    let (_state, app, _events) = test_app(10, executor).await;

    let (_, _) = request(&app, "POST", "/api/v1/tasks", Some(submit_body("busy"))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_, body) = request(&app, "POST", "/api/v1/tasks", Some(submit_body("pending"))).await;
    let id = body["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/tasks/{}", id);

    let (status, body) = request(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    // Cancel of a terminal task: no-op surfaced as a conflict.
    let (status, body) = request(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE");

    let (_, body) = request(&app, "GET", &uri, None).await;
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn test_get_unknown_task_is_404() {
    let (_state, app, _events) = test_app(10, MockExecutor::always_ok()).await;
    let (status, body) = request(
        &app,
        "GET",
        "/api/v1/tasks/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let (_state, app, events) = test_app(10, MockExecutor::always_ok()).await;

    let (_, body) = request(&app, "POST", "/api/v1/tasks", Some(submit_body("a"))).await;
    let id: uuid::Uuid = body["id"].as_str().unwrap().parse().unwrap();

    let uri = format!("/api/v1/tasks/{}", id);
    for _ in 0..100 {
        let (_, body) = request(&app, "GET", &uri, None).await;
        if body["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        events.topics_for(id),
        vec!["task.submitted", "task.started", "task.completed"]
    );
}

#[tokio::test]
async fn test_stats_and_breakers_endpoints() {
    let (state, app, _events) = test_app(10, MockExecutor::always_ok()).await;
    state.breakers.get_or_create("object-store");

    let (status, body) = request(&app, "GET", "/api/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["queue"].is_object());
    assert!(body["pool"].is_object());
    assert!(body["tasks"].is_object());

    let (status, body) = request(&app, "GET", "/api/v1/breakers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "object-store");
    assert_eq!(body[0]["state"], "closed");

    let (status, _) = request(&app, "POST", "/api/v1/breakers/reset", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_missing_metrics() {
    let (_state, app, _events) = test_app(10, MockExecutor::always_ok()).await;
    let (status, body) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = request(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
