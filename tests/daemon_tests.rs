//! Supervisor loop behaviour with the mock interface.

mod common;

use async_trait::async_trait;
use common::recording_state_with;
use potatomesh_ingest::daemon::InterfaceFactory;
use potatomesh_ingest::{
    daemon, stop_channel, IngestConfig, IngestError, Ingestor, MeshInterface, MockInterface,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn daemon_runs_against_the_mock_target_and_stops_cleanly() {
    let (state, _sender) = recording_state_with(IngestConfig {
        connection: Some("mock".to_string()),
        snapshot_secs: 1,
        ..Default::default()
    });
    let ingestor = Arc::new(Ingestor::new());
    let (stop_handle, stop) = stop_channel();

    let run = tokio::spawn(daemon::run(state, ingestor, stop));
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_handle.trigger();

    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("daemon did not stop")
        .expect("task panicked");
    assert!(result.is_ok());
}

/// Factory recording each connection attempt, handing back a fresh mock
/// with one node so every session reseeds the snapshot.
struct CountingFactory {
    opens: Mutex<Vec<Instant>>,
}

impl CountingFactory {
    fn new() -> Arc<CountingFactory> {
        Arc::new(CountingFactory {
            opens: Mutex::new(Vec::new()),
        })
    }

    fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    async fn wait_for_opens(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(120), async {
            while self.open_count() < count {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("expected connection attempt never happened");
    }
}

#[async_trait]
impl InterfaceFactory for CountingFactory {
    async fn open(
        &self,
        _target: Option<&str>,
    ) -> Result<(Box<dyn MeshInterface>, String), IngestError> {
        self.opens.lock().unwrap().push(Instant::now());
        let iface = MockInterface::new().with_nodes(vec![(
            "!00000001".to_string(),
            json!({"user": {"shortName": "one"}, "lastHeard": 1}),
        )]);
        Ok((Box::new(iface), "mock".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn inactivity_reconnect_fires_at_most_once_per_window() {
    let window = Duration::from_secs(3);
    let (state, sender) = recording_state_with(IngestConfig {
        connection: Some("mock".to_string()),
        snapshot_secs: 1,
        inactivity_reconnect: window,
        close_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let ingestor = Arc::new(Ingestor::new());
    let (stop_handle, stop) = stop_channel();
    let factory = CountingFactory::new();

    let run = tokio::spawn(daemon::run_with_factory(
        Arc::clone(&state),
        ingestor,
        stop,
        factory.clone(),
    ));

    // A full window of radio silence forces one close-and-reopen.
    factory.wait_for_opens(2).await;

    // Inside the fresh window a second reconnect must not fire.
    tokio::time::sleep(window / 2).await;
    assert_eq!(factory.open_count(), 2);

    // Another window of silence brings the next one.
    factory.wait_for_opens(3).await;

    stop_handle.trigger();
    run.await.unwrap().unwrap();

    let opens = factory.opens.lock().unwrap();
    assert!(opens[1].duration_since(opens[0]) >= window);
    assert!(opens[2].duration_since(opens[1]) >= window);

    // Every session reseeds the node snapshot.
    let node_posts = sender
        .posts
        .lock()
        .await
        .iter()
        .filter(|(path, _)| path == "/api/nodes")
        .count();
    assert_eq!(node_posts, opens.len());
}

#[tokio::test]
async fn ble_targets_fail_with_a_clear_error() {
    let result = potatomesh_ingest::create_interface("aa:bb:cc:dd:ee:ff").await;
    let err = result.err().expect("BLE must be rejected");
    assert!(err.to_string().contains("BLE"));
}

#[tokio::test]
async fn stop_signal_bounds_every_wait() {
    let (stop_handle, mut stop) = stop_channel();
    assert!(!stop.is_triggered());
    // Untriggered waits run to their timeout.
    assert!(!stop.wait_timeout(Duration::from_millis(10)).await);

    stop_handle.trigger();
    assert!(stop.wait_timeout(Duration::from_secs(3600)).await);
    assert!(stop.is_triggered());
}

#[tokio::test]
async fn stop_signal_wakes_sleepers_immediately() {
    let (stop_handle, mut stop) = stop_channel();
    let waiter = tokio::spawn(async move { stop.wait_timeout(Duration::from_secs(3600)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    stop_handle.trigger();
    let stopped = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter hung")
        .expect("waiter panicked");
    assert!(stopped);
}
