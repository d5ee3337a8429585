//! Traceroute records for `/api/traces`.

use crate::handlers::packet_rx_time;
use crate::packet::node_id::{canonical_node_id, node_num_from_id};
use crate::packet::value::{coerce_float, coerce_int, first, get, iso};
use crate::queue::TRACE_POST_PRIORITY;
use crate::state::SharedState;
use serde_json::{json, Map, Value};

/// Coerces hop entries to node numbers while preserving order.
fn normalize_trace_hops(hops_value: Option<&Value>) -> Vec<i64> {
    let Some(hops_value) = hops_value else {
        return Vec::new();
    };
    let entries: Vec<&Value> = match hops_value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut normalized = Vec::new();
    for hop in entries {
        let hop_value = if hop.is_object() {
            first(hop, &["node_id", "nodeId", "id", "num"])
        } else {
            Some(hop)
        };
        let canonical = canonical_node_id(hop_value);
        let hop_id = match canonical {
            Some(id) => node_num_from_id(Some(&Value::from(id))),
            None => node_num_from_id(hop_value),
        }
        .or_else(|| coerce_int(hop_value));
        if let Some(hop_id) = hop_id {
            normalized.push(hop_id);
        }
    }
    normalized
}

/// Normalises a traceroute packet and queues the hop path for upload.
///
/// Hops are the order-preserving union of every hop list found on the
/// traceroute section and the decoded view, deduplicated by node number.
pub async fn store_traceroute_packet(state: &SharedState, packet: &Value, decoded: &Value) {
    let empty = json!({});
    let section = get(decoded, "traceroute")
        .filter(|value| value.is_object())
        .unwrap_or(&empty);

    let request_id = coerce_int(
        first(section, &["requestId", "request_id"])
            .or_else(|| first(decoded, &["req", "requestId", "request_id"])),
    );
    let pkt_id = coerce_int(first(packet, &["id", "packet_id", "packetId"])).or(request_id);

    let rx_time = packet_rx_time(packet);

    let src = coerce_int(
        first(decoded, &["src", "source"]).or_else(|| first(packet, &["fromId", "from_id", "from"])),
    );
    let dest = coerce_int(
        first(decoded, &["dest", "destination"])
            .or_else(|| first(packet, &["toId", "to_id", "to"])),
    );

    let rssi = coerce_int(
        first(section, &["rssi"]).or_else(|| first(packet, &["rssi", "rx_rssi", "rxRssi"])),
    );
    let snr = coerce_float(
        first(section, &["snr"]).or_else(|| first(packet, &["snr", "rx_snr", "rxSnr"])),
    );
    let elapsed_ms = coerce_int(first(section, &["elapsed_ms", "latency_ms", "latencyMs"]));

    let hop_candidates = [
        first(section, &["hops"]),
        first(section, &["path"]),
        first(section, &["route"]),
        first(decoded, &["hops"]),
        first(decoded, &["path"]),
    ];
    let mut hops: Vec<i64> = Vec::new();
    for candidate in hop_candidates {
        for hop in normalize_trace_hops(candidate) {
            if !hops.contains(&hop) {
                hops.push(hop);
            }
        }
    }

    if pkt_id.is_none() && request_id.is_none() && hops.is_empty() {
        state.record_ignored(packet, "traceroute-missing-identifiers");
        return;
    }

    let mut payload = Map::new();
    payload.insert(
        "id".to_string(),
        pkt_id.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "request_id".to_string(),
        request_id.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "src".to_string(),
        src.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "dest".to_string(),
        dest.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert("rx_time".to_string(), Value::from(rx_time));
    payload.insert("rx_iso".to_string(), Value::from(iso(rx_time)));
    payload.insert("hops".to_string(), json!(hops));
    payload.insert(
        "rssi".to_string(),
        rssi.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "snr".to_string(),
        snr.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "elapsed_ms".to_string(),
        elapsed_ms.map(Value::from).unwrap_or(Value::Null),
    );

    state.radio.apply(&mut payload);
    state
        .queue
        .enqueue("/api/traces", Value::Object(payload), TRACE_POST_PRIORITY)
        .await;
}
