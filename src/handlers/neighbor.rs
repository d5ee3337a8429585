//! Neighbour snapshots for `/api/neighbors`.

use crate::handlers::packet_rx_time;
use crate::packet::node_id::{canonical_node_id, node_num_from_id};
use crate::packet::value::{coerce_float, coerce_int, first, get, iso};
use crate::queue::NEIGHBOR_POST_PRIORITY;
use crate::state::SharedState;
use log::debug;
use serde_json::{Map, Value};

/// Normalises a neighborinfo packet and queues it for upload.
pub async fn store_neighborinfo_packet(state: &SharedState, packet: &Value, decoded: &Value) {
    let Some(section) = get(decoded, "neighborinfo").filter(|value| value.is_object()) else {
        return;
    };

    let node_ref = first(section, &["nodeId", "node_id"])
        .or_else(|| first(packet, &["fromId", "from_id", "from"]));
    let Some(node_id) = canonical_node_id(node_ref) else {
        debug!("Dropping neighborinfo packet without a resolvable node id");
        return;
    };

    let node_num = coerce_int(first(section, &["nodeId", "node_id"]))
        .or_else(|| node_num_from_id(Some(&Value::from(node_id.as_str()))));

    let node_broadcast_interval = coerce_int(first(
        section,
        &["nodeBroadcastIntervalSecs", "node_broadcast_interval_secs"],
    ));
    let last_sent_by_id =
        canonical_node_id(first(section, &["lastSentById", "last_sent_by_id"]));

    let rx_time = packet_rx_time(packet);

    let mut neighbor_entries: Vec<Value> = Vec::new();
    if let Some(Value::Array(neighbors)) = get(section, "neighbors") {
        for entry in neighbors {
            if !entry.is_object() {
                continue;
            }
            let neighbor_ref = first(entry, &["nodeId", "node_id"]);
            let Some(neighbor_id) = canonical_node_id(neighbor_ref) else {
                continue;
            };
            let neighbor_num = coerce_int(neighbor_ref)
                .or_else(|| node_num_from_id(Some(&Value::from(neighbor_id.as_str()))));
            let snr = coerce_float(first(entry, &["snr"]));
            let entry_rx_time =
                coerce_int(first(entry, &["rxTime", "rx_time"])).unwrap_or(rx_time);

            let mut neighbor = Map::new();
            neighbor.insert("neighbor_id".to_string(), Value::from(neighbor_id));
            neighbor.insert(
                "neighbor_num".to_string(),
                neighbor_num.map(Value::from).unwrap_or(Value::Null),
            );
            neighbor.insert(
                "snr".to_string(),
                snr.map(Value::from).unwrap_or(Value::Null),
            );
            neighbor.insert("rx_time".to_string(), Value::from(entry_rx_time));
            neighbor.insert("rx_iso".to_string(), Value::from(iso(entry_rx_time)));
            neighbor_entries.push(Value::Object(neighbor));
        }
    }

    let mut payload = Map::new();
    payload.insert("node_id".to_string(), Value::from(node_id));
    payload.insert(
        "node_num".to_string(),
        node_num.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert("neighbors".to_string(), Value::Array(neighbor_entries));
    payload.insert("rx_time".to_string(), Value::from(rx_time));
    payload.insert("rx_iso".to_string(), Value::from(iso(rx_time)));
    if let Some(interval) = node_broadcast_interval {
        payload.insert(
            "node_broadcast_interval_secs".to_string(),
            Value::from(interval),
        );
    }
    if let Some(last_sent) = last_sent_by_id {
        payload.insert("last_sent_by_id".to_string(), Value::from(last_sent));
    }

    state.radio.apply(&mut payload);
    state
        .queue
        .enqueue(
            "/api/neighbors",
            Value::Object(payload),
            NEIGHBOR_POST_PRIORITY,
        )
        .await;
}
