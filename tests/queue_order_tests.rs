//! Ordering guarantees of the dispatch queue under a live drain.

use async_trait::async_trait;
use potatomesh_ingest::queue::{
    PostQueue, PostSender, MESSAGE_POST_PRIORITY, NODE_POST_PRIORITY,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Sender whose deliveries block until a permit is released, letting tests
/// pile up entries behind an in-flight POST.
struct GatedSender {
    gate: Semaphore,
    posts: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl PostSender for GatedSender {
    async fn send(&self, path: &str, body: &Value) {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.posts.lock().await.push((path.to_string(), body.clone()));
    }
}

#[tokio::test]
async fn pending_messages_preempt_pending_node_uploads() {
    let sender = Arc::new(GatedSender {
        gate: Semaphore::new(0),
        posts: Mutex::new(Vec::new()),
    });
    let queue = Arc::new(PostQueue::new(sender.clone()));

    // The first enqueue becomes the drain worker and parks inside the gated
    // sender with a node upload in flight.
    let drain_queue = Arc::clone(&queue);
    let drain = tokio::spawn(async move {
        drain_queue
            .enqueue("/api/nodes", json!({"n": 1}), NODE_POST_PRIORITY)
            .await;
    });
    tokio::task::yield_now().await;

    // These append behind the in-flight POST and return immediately.
    queue
        .enqueue("/api/nodes", json!({"n": 2}), NODE_POST_PRIORITY)
        .await;
    queue
        .enqueue("/api/messages", json!({"m": 1}), MESSAGE_POST_PRIORITY)
        .await;

    sender.gate.add_permits(3);
    drain.await.unwrap();

    let posts = sender.posts.lock().await;
    let paths: Vec<&str> = posts.iter().map(|(path, _)| path.as_str()).collect();
    // The in-flight node POST cannot be unseated, but the pending message
    // wins over the remaining node upload.
    assert_eq!(paths, vec!["/api/nodes", "/api/messages", "/api/nodes"]);
}

#[tokio::test]
async fn concurrent_enqueues_never_spawn_a_second_worker() {
    let sender = Arc::new(GatedSender {
        gate: Semaphore::new(0),
        posts: Mutex::new(Vec::new()),
    });
    let queue = Arc::new(PostQueue::new(sender.clone()));

    let drain_queue = Arc::clone(&queue);
    let drain = tokio::spawn(async move {
        drain_queue
            .enqueue("/api/messages", json!({"m": 0}), MESSAGE_POST_PRIORITY)
            .await;
    });
    tokio::task::yield_now().await;

    // Ten concurrent producers; each must return without draining.
    for index in 1..=10 {
        queue
            .enqueue("/api/messages", json!({"m": index}), MESSAGE_POST_PRIORITY)
            .await;
    }
    assert_eq!(queue.pending(), 10);

    sender.gate.add_permits(11);
    drain.await.unwrap();
    assert_eq!(queue.pending(), 0);

    let posts = sender.posts.lock().await;
    let order: Vec<i64> = posts
        .iter()
        .map(|(_, body)| body["m"].as_i64().unwrap())
        .collect();
    assert_eq!(order, (0..=10).collect::<Vec<i64>>());
}
