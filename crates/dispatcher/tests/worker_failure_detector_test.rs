mod common;

use std::sync::Arc;

use chrono::Duration;
use orchestrator_dispatcher::WorkerFailureDetector;
use orchestrator_domain::WorkerStatus;

use common::Harness;

#[tokio::test]
async fn test_silent_worker_is_marked_offline() {
    let h = Harness::new();
    let detector = WorkerFailureDetector::new(h.registry.clone(), 30);
    h.heartbeat("w1", &["default"]).await;
    h.heartbeat("w2", &["default"]).await;

    assert_eq!(detector.detect_once().await, 0);

    h.clock.advance(Duration::seconds(60));
    h.heartbeat("w2", &["default"]).await;
    h.clock.advance(Duration::seconds(31));

    assert_eq!(detector.detect_once().await, 1);
    let w1 = h.registry.get("w1").await.unwrap().unwrap();
    let w2 = h.registry.get("w2").await.unwrap().unwrap();
    assert_eq!(w1.status, WorkerStatus::Offline);
    assert_eq!(w2.status, WorkerStatus::Online);

    // 已离线的 Worker 不会重复计数
    assert_eq!(detector.detect_once().await, 0);
}

#[tokio::test]
async fn test_heartbeat_brings_worker_back_online() {
    let h = Harness::new();
    let detector = WorkerFailureDetector::new(h.registry.clone(), 30);
    h.heartbeat("w1", &["default"]).await;
    h.clock.advance(Duration::seconds(120));
    detector.detect_once().await;

    h.heartbeat("w1", &["default"]).await;

    let worker = h.registry.get("w1").await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Online);
    assert!(h.registry.has_online_workers().await.unwrap());
}

#[tokio::test]
async fn test_detector_loop_stops_on_shutdown() {
    let h = Harness::new();
    let detector = Arc::new(WorkerFailureDetector::new(h.registry.clone(), 1));
    let shutdown = tokio_util::sync::CancellationToken::new();

    let handle = tokio::spawn(detector.run(shutdown.clone()));
    shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("detector should stop")
        .unwrap();
}
