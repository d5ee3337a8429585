//! Bulk node upserts used by the initial snapshot.

use crate::queue::NODE_POST_PRIORITY;
use crate::state::SharedState;
use log::debug;
use serde_json::{Map, Value};

/// Queues an upsert for a single node from the interface's node map.
pub async fn upsert_node(state: &SharedState, node_id: &str, node: &Value) {
    let mut payload = Map::new();
    payload.insert(node_id.to_string(), node.clone());
    state.radio.apply_to_nodes(&mut payload);

    debug!("Queued node upsert payload node_id={node_id}");
    state
        .queue
        .enqueue("/api/nodes", Value::Object(payload), NODE_POST_PRIORITY)
        .await;
}
