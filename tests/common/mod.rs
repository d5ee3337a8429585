//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use potatomesh_ingest::{IngestConfig, PostQueue, PostSender, SharedState};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Transport stub recording every delivery instead of POSTing.
pub struct RecordingSender {
    pub posts: Mutex<Vec<(String, Value)>>,
}

impl RecordingSender {
    pub fn new() -> Arc<RecordingSender> {
        Arc::new(RecordingSender {
            posts: Mutex::new(Vec::new()),
        })
    }

    pub async fn paths(&self) -> Vec<String> {
        self.posts
            .lock()
            .await
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }
}

#[async_trait]
impl PostSender for RecordingSender {
    async fn send(&self, path: &str, body: &Value) {
        self.posts.lock().await.push((path.to_string(), body.clone()));
    }
}

/// Builds a fresh daemon state around a recording transport.
pub fn recording_state() -> (Arc<SharedState>, Arc<RecordingSender>) {
    recording_state_with(IngestConfig::default())
}

/// Same as [`recording_state`] with a custom configuration.
pub fn recording_state_with(config: IngestConfig) -> (Arc<SharedState>, Arc<RecordingSender>) {
    let sender = RecordingSender::new();
    let state = Arc::new(SharedState::new(config, PostQueue::new(sender.clone())));
    (state, sender)
}
