//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::config::Config;
use api::{AppState, Backends};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::AggregateId;
use domain::CreatePrescription;
use event_bus::InMemoryEventBus;
use event_store::InMemoryEventStore;
use lock_manager::{InMemoryLockManager, LockManager, LockOptions};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    let state = Arc::new(AppState::in_memory(LockOptions::default()));
    api::create_app(state, get_metrics_handle())
}

/// Builds an app over store and lock handles the test keeps.
fn setup_with_backends(
    lock_options: LockOptions,
) -> (axum::Router, InMemoryEventStore, InMemoryLockManager) {
    let store = InMemoryEventStore::new();
    let locks = InMemoryLockManager::new();
    let state = Arc::new(AppState::new(
        Arc::new(store.clone()),
        Arc::new(locks.clone()),
        lock_options,
        Backends::IN_MEMORY,
    ));
    (api::create_app(state, get_metrics_handle()), store, locks)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn create(app: &axum::Router) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/prescriptions",
            serde_json::json!({
                "medication_id": "m1",
                "patient_id": "p1",
                "address": "1 Main St"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    body_json(response).await["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["event_store"], "memory");
    assert_eq!(json["lock_manager"], "memory");
}

#[tokio::test]
async fn test_create_prescription() {
    let (app, store, locks) = setup_with_backends(LockOptions::default());

    let response = app
        .oneshot(json_request(
            "POST",
            "/prescriptions",
            serde_json::json!({
                "medication_id": "m1",
                "patient_id": "p1",
                "address": "1 Main St"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert!(!json["id"].as_str().unwrap().is_empty());
    assert_eq!(json["medicationId"], "m1");
    assert_eq!(json["patientId"], "p1");
    assert_eq!(json["address"], "1 Main St");
    assert_eq!(json["state"], "Created");

    assert_eq!(store.event_count().await, 1);
    assert_eq!(store.outbox_count().await, 1);
    assert_eq!(locks.lock_calls(), 0);
}

#[tokio::test]
async fn test_create_with_missing_fields() {
    let (app, store, _) = setup_with_backends(LockOptions::default());

    let response = app
        .oneshot(json_request(
            "POST",
            "/prescriptions",
            serde_json::json!({ "medication_id": "m1", "address": "" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["param"], "patient_id");
    assert_eq!(errors[0]["code"], "parameter_missing");
    assert_eq!(errors[1]["param"], "address");
    assert_eq!(store.event_count().await, 0);
}

#[tokio::test]
async fn test_create_with_malformed_body() {
    let app = setup();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/prescriptions")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_update_prescription() {
    let (app, store, locks) = setup_with_backends(LockOptions::default());
    let id = create(&app).await;

    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/prescriptions/{id}"),
            serde_json::json!({ "address": "2 Oak Ave" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["address"], "2 Oak Ave");
    assert_eq!(json["medicationId"], "m1");

    assert_eq!(store.event_count().await, 2);
    assert_eq!(locks.lock_calls(), 1);
    assert!(!locks.is_locked(&AggregateId::new(id)));
}

#[tokio::test]
async fn test_update_nonexistent_prescription() {
    let (app, _, locks) = setup_with_backends(LockOptions::default());

    let response = app
        .oneshot(json_request(
            "PATCH",
            "/prescriptions/nonexistent",
            serde_json::json!({ "address": "2 Oak Ave" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["kind"], "not_found");
    assert_eq!(locks.lock_calls(), 0);
}

#[tokio::test]
async fn test_update_without_address() {
    let (app, store, _) = setup_with_backends(LockOptions::default());
    let id = create(&app).await;

    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/prescriptions/{id}"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["errors"][0]["param"], "address");
    assert_eq!(store.event_count().await, 1);
}

#[tokio::test]
async fn test_update_under_contention() {
    let options = LockOptions {
        ttl: Duration::from_secs(30),
        max_attempts: 2,
        retry_delay: Duration::from_millis(5),
    };
    let (app, store, locks) = setup_with_backends(options);
    let id = create(&app).await;

    let aggregate_id = AggregateId::new(id.clone());
    assert!(locks.try_lock(&aggregate_id, options.ttl).await.unwrap());

    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/prescriptions/{id}"),
            serde_json::json!({ "address": "2 Oak Ave" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["kind"], "lock_contention");
    assert_eq!(store.event_count().await, 1);
    assert!(locks.is_locked(&aggregate_id));
}

#[tokio::test]
async fn test_storage_failure_is_internal_error() {
    let (app, store, _) = setup_with_backends(LockOptions::default());
    store.fail_next_event_insert().await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/prescriptions",
            serde_json::json!({
                "medication_id": "m1",
                "patient_id": "p1",
                "address": "1 Main St"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["kind"], "storage_failure");
    assert_eq!(store.outbox_count().await, 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    create(&app).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("prescription_commands_total"));
}

/// Stores one prescription through the service and returns its store.
async fn store_with_one_entry() -> InMemoryEventStore {
    let store = InMemoryEventStore::new();
    let state = AppState::new(
        Arc::new(store.clone()),
        Arc::new(InMemoryLockManager::new()),
        LockOptions::default(),
        Backends::IN_MEMORY,
    );
    state
        .service
        .create_prescription(CreatePrescription::new("m1", "p1", "1 Main St"), |_| ())
        .await
        .unwrap();
    assert_eq!(store.outbox_count().await, 1);
    store
}

#[tokio::test(start_paused = true)]
async fn test_relay_without_broker_keeps_outbox() {
    let store = store_with_one_entry().await;
    let (_tx, rx) = watch::channel(false);

    let task = api::start_relay(&Config::default(), Arc::new(store.clone()), None, rx);
    assert!(task.is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.outbox_count().await, 1);
    assert_eq!(store.event_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_relay_disabled_ignores_broker() {
    let store = store_with_one_entry().await;
    let bus = InMemoryEventBus::recording();
    let (_tx, rx) = watch::channel(false);
    let config = Config {
        outbox_enabled: false,
        ..Config::default()
    };

    let task = api::start_relay(&config, Arc::new(store.clone()), Some(Arc::new(bus.clone())), rx);
    assert!(task.is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.outbox_count().await, 1);
    assert!(bus.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_relay_with_broker_drains_outbox() {
    let store = store_with_one_entry().await;
    let bus = InMemoryEventBus::recording();
    let (tx, rx) = watch::channel(false);

    let task = api::start_relay(
        &Config::default(),
        Arc::new(store.clone()),
        Some(Arc::new(bus.clone())),
        rx,
    )
    .expect("relay should start");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.outbox_count().await, 0);
    assert_eq!(bus.published_to(outbox::TOPIC_CREATED).len(), 1);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("relay did not stop")
        .unwrap();
}
