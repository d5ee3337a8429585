//! # Priority Queue for POST Operations
//!
//! A single shared FIFO-within-priority queue that serialises uploads to the
//! dashboard API. Lower priority numbers dispatch first; ties break by
//! enqueue order through a monotonically increasing sequence counter. At most
//! one drain runs at a time: the caller that flips the `active` flag works
//! the heap until it is empty, issuing POSTs outside the lock, while
//! concurrent enqueues simply append and return.

use crate::config::IngestConfig;
use crate::error::IngestError;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Priority assigned to chat message uploads.
pub const MESSAGE_POST_PRIORITY: u8 = 10;
/// Priority assigned to neighbour snapshot uploads.
pub const NEIGHBOR_POST_PRIORITY: u8 = 20;
/// Priority assigned to traceroute uploads.
pub const TRACE_POST_PRIORITY: u8 = 25;
/// Priority assigned to position uploads.
pub const POSITION_POST_PRIORITY: u8 = 30;
/// Priority assigned to telemetry uploads.
pub const TELEMETRY_POST_PRIORITY: u8 = 40;
/// Priority assigned to bulk node upserts.
pub const NODE_POST_PRIORITY: u8 = 50;
/// Priority used when no explicit class applies.
pub const DEFAULT_POST_PRIORITY: u8 = 90;

/// Timeout applied to every POST request.
const POST_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser-style user agent; some instances sit behind proxies that reject
/// non-browser clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Transport used by the queue worker to deliver one record.
#[async_trait]
pub trait PostSender: Send + Sync {
    async fn send(&self, path: &str, body: &Value);
}

/// Default transport: JSON POSTs against the configured instance.
pub struct HttpSender {
    client: reqwest::Client,
    instance: String,
    api_token: String,
}

impl HttpSender {
    /// Builds the sender from the daemon configuration.
    pub fn new(config: &IngestConfig) -> Result<HttpSender, IngestError> {
        let client = reqwest::Client::builder().timeout(POST_TIMEOUT).build()?;
        Ok(HttpSender {
            client,
            instance: config.instance.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl PostSender for HttpSender {
    async fn send(&self, path: &str, body: &Value) {
        if self.instance.is_empty() {
            return;
        }
        let url = format!("{}{}", self.instance, path);
        let mut request = self
            .client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Origin", &self.instance)
            .header("Referer", &self.instance)
            .json(body);
        if !self.api_token.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_token));
        }
        match request.send().await {
            Ok(response) => {
                if let Err(err) = response.error_for_status() {
                    warn!("POST {url} failed: {err}");
                }
            }
            Err(err) => warn!("POST {url} failed: {err}"),
        }
    }
}

struct Entry {
    priority: u8,
    seq: u64,
    path: String,
    body: Value,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; reverse so the lowest (priority, seq) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<Entry>,
    counter: u64,
    active: bool,
}

/// The shared HTTP dispatch queue.
pub struct PostQueue {
    inner: Mutex<QueueInner>,
    sender: Arc<dyn PostSender>,
}

impl PostQueue {
    /// Creates a queue draining through `sender`.
    pub fn new(sender: Arc<dyn PostSender>) -> PostQueue {
        PostQueue {
            inner: Mutex::new(QueueInner::default()),
            sender,
        }
    }

    /// Creates a queue with the HTTP transport configured from `config`.
    pub fn with_config(config: &IngestConfig) -> Result<PostQueue, IngestError> {
        Ok(PostQueue::new(Arc::new(HttpSender::new(config)?)))
    }

    /// Queues a POST and drains the queue when no worker is active.
    ///
    /// Failed deliveries are logged by the transport and discarded; the drain
    /// continues with the next entry.
    pub async fn enqueue(&self, path: &str, body: Value, priority: u8) {
        debug!("Forwarding payload to API path={path} priority={priority}");
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let seq = inner.counter;
            inner.counter += 1;
            inner.heap.push(Entry {
                priority,
                seq,
                path: path.to_string(),
                body,
            });
            if inner.active {
                return;
            }
            inner.active = true;
        }
        self.drain().await;
    }

    async fn drain(&self) {
        loop {
            let entry = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                match inner.heap.pop() {
                    Some(entry) => entry,
                    None => {
                        inner.active = false;
                        return;
                    }
                }
            };
            self.sender.send(&entry.path, &entry.body).await;
        }
    }

    /// Number of pending entries; used by the supervisor for shutdown logs.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .len()
    }

    /// Drops all pending entries and resets the worker flag.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.heap.clear();
        inner.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingSender {
        posts: AsyncMutex<Vec<(String, Value)>>,
    }

    impl RecordingSender {
        fn new() -> Arc<RecordingSender> {
            Arc::new(RecordingSender {
                posts: AsyncMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PostSender for RecordingSender {
        async fn send(&self, path: &str, body: &Value) {
            self.posts.lock().await.push((path.to_string(), body.clone()));
        }
    }

    #[tokio::test]
    async fn drains_in_priority_then_fifo_order() {
        let sender = RecordingSender::new();
        let queue = PostQueue::new(sender.clone());

        // Pre-load the heap while no worker is active, then release.
        {
            let mut inner = queue.inner.lock().unwrap();
            inner.active = true;
        }
        queue
            .enqueue("/api/nodes", json!({"n": 1}), NODE_POST_PRIORITY)
            .await;
        queue
            .enqueue("/api/nodes", json!({"n": 2}), NODE_POST_PRIORITY)
            .await;
        queue
            .enqueue("/api/messages", json!({"m": 1}), MESSAGE_POST_PRIORITY)
            .await;
        {
            let mut inner = queue.inner.lock().unwrap();
            inner.active = false;
        }
        queue
            .enqueue("/api/messages", json!({"m": 2}), MESSAGE_POST_PRIORITY)
            .await;

        let posts = sender.posts.lock().await;
        let paths: Vec<&str> = posts.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/api/messages", "/api/messages", "/api/nodes", "/api/nodes"]
        );
        assert_eq!(posts[0].1, json!({"m": 1}));
        assert_eq!(posts[1].1, json!({"m": 2}));
        assert_eq!(posts[2].1, json!({"n": 1}));
        assert_eq!(posts[3].1, json!({"n": 2}));
    }

    #[tokio::test]
    async fn fifo_within_one_priority_class() {
        let sender = RecordingSender::new();
        let queue = PostQueue::new(sender.clone());
        for index in 0..5 {
            queue
                .enqueue("/api/messages", json!({"i": index}), MESSAGE_POST_PRIORITY)
                .await;
        }
        let posts = sender.posts.lock().await;
        let order: Vec<i64> = posts.iter().map(|(_, body)| body["i"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn clear_resets_pending_and_worker() {
        let sender = RecordingSender::new();
        let queue = PostQueue::new(sender);
        {
            let mut inner = queue.inner.lock().unwrap();
            inner.active = true;
        }
        queue.enqueue("/api/traces", json!({}), TRACE_POST_PRIORITY).await;
        assert_eq!(queue.pending(), 1);
        queue.clear();
        assert_eq!(queue.pending(), 0);
    }
}
