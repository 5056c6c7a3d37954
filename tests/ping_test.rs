use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use url::Url;

use evidence_sync::hashing::hash_bytes;
use evidence_sync::model::GpsFix;
use evidence_sync::ping::{spawn_ping_worker, FrameSample, PingClient, SessionContext};
use evidence_sync::store::RecordStore;
use evidence_sync::tags::SystemTag;

#[derive(Clone, Copy)]
enum Behavior {
    /// Reply with one car, one person and one bus
    Detect,
    Fail,
    /// Hold the request open for a long time
    Hang,
}

/// Shared state for the mock detection server
struct MockDetector {
    behavior: Behavior,
    calls: AtomicUsize,
    received: Mutex<Vec<HashMap<String, Vec<u8>>>>,
}

async fn ping_handler(
    State(state): State<Arc<MockDetector>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    state.calls.fetch_add(1, Ordering::SeqCst);

    let mut fields = HashMap::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap().to_string();
        fields.insert(name, field.bytes().await.unwrap().to_vec());
    }
    state.received.lock().unwrap().push(fields);

    match state.behavior {
        Behavior::Detect => (
            StatusCode::OK,
            Json(json!({
                "detections": [
                    {"label": "car", "track_id": 1, "thumbnail_url": "thumbs/car_1.jpg"},
                    {"label": "person", "track_id": 2},
                    {"label": "bus", "track_id": 3}
                ]
            })),
        )
            .into_response(),
        Behavior::Fail => (StatusCode::INTERNAL_SERVER_ERROR, "detector down").into_response(),
        Behavior::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            (StatusCode::OK, Json(json!({"detections": []}))).into_response()
        }
    }
}

async fn start_mock_detector(behavior: Behavior) -> (Url, Arc<MockDetector>) {
    let state = Arc::new(MockDetector {
        behavior,
        calls: AtomicUsize::new(0),
        received: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/api/v1/capture/ping", post(ping_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    let url = Url::parse(&format!("http://{}/api/v1/capture/ping", addr)).unwrap();
    (url, state)
}

async fn open_store() -> (RecordStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(&dir.path().join("evidence.sqlite"))
        .await
        .unwrap();
    (store, dir)
}

fn frame(data: &'static [u8]) -> FrameSample {
    FrameSample {
        jpeg: Bytes::from_static(data),
        gps: Some(GpsFix {
            lat: 28.6139,
            lng: 77.209,
        }),
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_vehicle_detections_attach_to_the_session_record() {
    let (store, _dir) = open_store().await;
    let (endpoint, detector) = start_mock_detector(Behavior::Detect).await;
    let record = store.create_recording("SESSION_ping_1", None).await.unwrap();

    let (frames, frames_rx) = watch::channel(None);
    let worker = spawn_ping_worker(
        SessionContext {
            record_id: record.id.clone(),
            session_id: record.session_id.clone(),
        },
        store.clone(),
        PingClient::new(endpoint, Duration::from_secs(2)).unwrap(),
        Duration::from_millis(50),
        frames_rx,
    );

    frames.send_replace(Some(frame(b"jpeg-frame-1")));
    assert!(wait_for(|| detector.calls.load(Ordering::SeqCst) >= 1, Duration::from_secs(3)).await);
    // Let the worker persist the first response
    tokio::time::sleep(Duration::from_millis(200)).await;
    frames.send_replace(Some(frame(b"jpeg-frame-2")));
    assert!(wait_for(|| detector.calls.load(Ordering::SeqCst) >= 2, Duration::from_secs(3)).await);

    let stats = worker.stop().await;
    assert!(stats.sent >= 1);
    assert_eq!(stats.detections_attached, 2);

    // Same vehicles seen twice are stored once; the pedestrian never
    let detections = store.detections_for(&record.id).await.unwrap();
    let mut identifiers: Vec<_> = detections
        .iter()
        .map(|d| d.vehicle_identifier.clone())
        .collect();
    identifiers.sort();
    assert_eq!(identifiers, vec!["bus_3", "car_1"]);
    let car = detections
        .iter()
        .find(|d| d.vehicle_class == SystemTag::Car)
        .unwrap();
    assert_eq!(car.thumbnail_uri.as_deref(), Some("thumbs/car_1.jpg"));

    let record = store.require(&record.id).await.unwrap();
    assert!(record.system_tags.contains(&SystemTag::Car));
    assert!(record.system_tags.contains(&SystemTag::Bus));

    let received = detector.received.lock().unwrap();
    let first = &received[0];
    assert_eq!(first["image"], b"jpeg-frame-1".to_vec());
    assert_eq!(
        String::from_utf8(first["frame_hash"].clone()).unwrap(),
        hash_bytes(b"jpeg-frame-1").as_str()
    );
    assert_eq!(String::from_utf8(first["gps_lat"].clone()).unwrap(), "28.6139");
    assert_eq!(String::from_utf8(first["gps_lng"].clone()).unwrap(), "77.209");
}

#[tokio::test]
async fn test_failed_pings_are_swallowed() {
    let (store, _dir) = open_store().await;
    let (endpoint, detector) = start_mock_detector(Behavior::Fail).await;
    let record = store.create_recording("SESSION_ping_2", None).await.unwrap();

    let (frames, frames_rx) = watch::channel(None);
    let worker = spawn_ping_worker(
        SessionContext {
            record_id: record.id.clone(),
            session_id: record.session_id.clone(),
        },
        store.clone(),
        PingClient::new(endpoint, Duration::from_secs(2)).unwrap(),
        Duration::from_millis(50),
        frames_rx,
    );

    frames.send_replace(Some(frame(b"frame")));
    assert!(wait_for(|| detector.calls.load(Ordering::SeqCst) >= 1, Duration::from_secs(3)).await);

    let stats = worker.stop().await;
    assert_eq!(stats.sent, stats.empty);
    assert_eq!(stats.detections_attached, 0);
    assert!(store.detections_for(&record.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unchanged_frame_is_not_resent() {
    let (store, _dir) = open_store().await;
    let (endpoint, detector) = start_mock_detector(Behavior::Fail).await;
    let record = store.create_recording("SESSION_ping_3", None).await.unwrap();

    let (frames, frames_rx) = watch::channel(None);
    let worker = spawn_ping_worker(
        SessionContext {
            record_id: record.id.clone(),
            session_id: record.session_id.clone(),
        },
        store.clone(),
        PingClient::new(endpoint, Duration::from_secs(2)).unwrap(),
        Duration::from_millis(20),
        frames_rx,
    );

    // No frame yet: nothing to send
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);

    frames.send_replace(Some(frame(b"only frame")));
    tokio::time::sleep(Duration::from_millis(300)).await;
    worker.stop().await;
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_at_most_one_ping_per_interval() {
    let (store, _dir) = open_store().await;
    let (endpoint, detector) = start_mock_detector(Behavior::Fail).await;
    let record = store.create_recording("SESSION_ping_4", None).await.unwrap();

    let (frames, frames_rx) = watch::channel(None);
    let worker = spawn_ping_worker(
        SessionContext {
            record_id: record.id.clone(),
            session_id: record.session_id.clone(),
        },
        store.clone(),
        PingClient::new(endpoint, Duration::from_secs(2)).unwrap(),
        Duration::from_millis(250),
        frames_rx,
    );

    // A camera producing frames far faster than the ping cadence
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(1000) {
        frames.send_replace(Some(frame(b"fast frame")));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker.stop().await;

    let calls = detector.calls.load(Ordering::SeqCst);
    assert!(calls >= 2, "expected a few pings, got {}", calls);
    assert!(calls <= 5, "expected at most one ping per interval, got {}", calls);
}

#[tokio::test]
async fn test_stop_cancels_in_flight_ping() {
    let (store, _dir) = open_store().await;
    let (endpoint, detector) = start_mock_detector(Behavior::Hang).await;
    let record = store.create_recording("SESSION_ping_5", None).await.unwrap();

    let (frames, frames_rx) = watch::channel(None);
    let worker = spawn_ping_worker(
        SessionContext {
            record_id: record.id.clone(),
            session_id: record.session_id.clone(),
        },
        store.clone(),
        PingClient::new(endpoint, Duration::from_secs(20)).unwrap(),
        Duration::from_millis(20),
        frames_rx,
    );

    frames.send_replace(Some(frame(b"frame")));
    assert!(wait_for(|| detector.calls.load(Ordering::SeqCst) >= 1, Duration::from_secs(3)).await);

    let stopping = Instant::now();
    worker.stop().await;
    assert!(stopping.elapsed() < Duration::from_secs(1));

    // Nothing more goes out once stopped
    frames.send_replace(Some(frame(b"late frame")));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
}
