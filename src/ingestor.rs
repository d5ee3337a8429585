//! # Ingestor Identity and Liveness
//!
//! Tracks the daemon's start time and host node identity, and announces
//! liveness to `/api/ingestors` at most once per heartbeat interval.

use crate::handlers;
use crate::packet::node_id::canonical_node_id_str;
use crate::queue::DEFAULT_POST_PRIORITY;
use crate::state::SharedState;
use serde_json::json;
use std::sync::Mutex;

/// Version advertised in heartbeat announcements.
pub const INGESTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Mutable ingestor identity and heartbeat tracking data.
pub struct Ingestor {
    start_time: i64,
    node_id: Mutex<Option<String>>,
    last_heartbeat: Mutex<Option<i64>>,
}

impl Ingestor {
    pub fn new() -> Ingestor {
        Ingestor {
            start_time: handlers::now_unix(),
            node_id: Mutex::new(None),
            last_heartbeat: Mutex::new(None),
        }
    }

    /// Unix timestamp of when the ingestor booted.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Records the canonical host node identifier.
    ///
    /// A change of identity resets the heartbeat clock so the new identity
    /// announces immediately.
    pub fn set_node_id(&self, node_id: Option<&str>) -> Option<String> {
        let canonical = node_id.and_then(canonical_node_id_str)?;
        let mut current = self.node_id.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_deref() != Some(canonical.as_str()) {
            *current = Some(canonical.clone());
            *self
                .last_heartbeat
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = None;
        }
        Some(canonical)
    }

    /// Queues a heartbeat payload advertising ingestor liveness.
    ///
    /// Returns `true` when an announcement was queued. Without `force`, the
    /// guard suppresses announcements until the configured interval elapsed.
    pub async fn queue_heartbeat(&self, state: &SharedState, force: bool) -> bool {
        let Some(node_id) = self
            .node_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        else {
            return false;
        };

        let now = handlers::now_unix();
        let interval = state.config.heartbeat_secs as i64;
        {
            let last = self.last_heartbeat.lock().unwrap_or_else(|e| e.into_inner());
            if !force {
                if let Some(last) = *last {
                    if now - last < interval {
                        return false;
                    }
                }
            }
        }

        let payload = json!({
            "node_id": node_id,
            "start_time": self.start_time,
            "last_seen_time": now,
            "version": INGESTOR_VERSION,
        });
        state
            .queue
            .enqueue("/api/ingestors", payload, DEFAULT_POST_PRIORITY)
            .await;
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(now);
        true
    }
}

impl Default for Ingestor {
    fn default() -> Self {
        Ingestor::new()
    }
}
