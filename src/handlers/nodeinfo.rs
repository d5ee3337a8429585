//! Node information upserts for `/api/nodes`.

use crate::handlers::packet_rx_time;
use crate::packet::convert;
use crate::packet::node_id::{canonical_node_id, node_num_from_id};
use crate::packet::value::{coerce_float, coerce_int, extract_payload_bytes, first, get, merge_values};
use crate::proto;
use crate::queue::NODE_POST_PRIORITY;
use crate::state::SharedState;
use log::debug;
use prost::Message;
use serde_json::{Map, Value};

/// Decodes a raw nodeinfo payload, falling back to a bare `User` message.
///
/// Some firmware versions put a `User` on the wire where a `NodeInfo` is
/// expected; those are wrapped so downstream merging sees one shape.
fn decode_nodeinfo_payload(payload: Option<&[u8]>) -> Option<proto::NodeInfo> {
    let bytes = payload?;
    if bytes.is_empty() {
        return None;
    }
    if let Ok(info) = proto::NodeInfo::decode(bytes) {
        return Some(info);
    }
    match proto::User::decode(bytes) {
        Ok(user) => Some(proto::NodeInfo {
            user: Some(user),
            ..Default::default()
        }),
        Err(_) => None,
    }
}

/// Returns a canonical role string when the raw value is resolvable.
fn normalize_user_role(value: &Value) -> Option<Value> {
    match value {
        Value::String(text) => {
            let cleaned = text.trim();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::from(cleaned.to_uppercase()))
            }
        }
        _ => {
            let numeric = coerce_int(Some(value))?;
            let resolved = i32::try_from(numeric)
                .ok()
                .and_then(proto::role_name)
                .map(Value::from)
                .unwrap_or_else(|| Value::from(numeric.to_string()));
            Some(resolved)
        }
    }
}

/// Combines protobuf and decoded user views into one mapping.
fn nodeinfo_user_value(
    node_info: Option<&proto::NodeInfo>,
    decoded_user: Option<&Value>,
) -> Option<Value> {
    let mut user: Option<Value> = node_info
        .and_then(|info| info.user.as_ref())
        .map(convert::user_to_value);
    if let Some(extra) = decoded_user.filter(|value| value.is_object()) {
        user = Some(merge_values(user.as_ref(), extra));
    }
    let mut user = user?;
    if let Value::Object(map) = &mut user {
        if let Some(canonical) = canonical_node_id(map.get("id")) {
            map.insert("id".to_string(), Value::from(canonical));
        }
        if let Some(role) = map.get("role").cloned() {
            if let Some(normalized) = normalize_user_role(&role) {
                if normalized != role {
                    map.insert("role".to_string(), normalized);
                }
            }
        }
    }
    Some(user)
}

/// Normalises a nodeinfo packet and queues a node upsert.
pub async fn store_nodeinfo_packet(state: &SharedState, packet: &Value, decoded: &Value) {
    let payload_bytes = extract_payload_bytes(decoded);
    let node_info = decode_nodeinfo_payload(payload_bytes.as_deref());
    let user_value = nodeinfo_user_value(node_info.as_ref(), get(decoded, "user"));

    let node_id = user_value
        .as_ref()
        .and_then(|user| canonical_node_id(get(user, "id")))
        .or_else(|| canonical_node_id(first(packet, &["fromId", "from_id", "from"])));
    let Some(node_id) = node_id else {
        debug!("Dropping nodeinfo packet without a resolvable node id");
        return;
    };

    let mut node_payload = Map::new();
    if let Some(user) = user_value.clone() {
        node_payload.insert("user".to_string(), user);
    }

    let proto_num = node_info
        .as_ref()
        .map(|info| info.num)
        .filter(|num| *num != 0)
        .map(i64::from);
    let node_num = proto_num
        .or_else(|| coerce_int(get(decoded, "num")))
        .or_else(|| node_num_from_id(Some(&Value::from(node_id.as_str()))));
    if let Some(num) = node_num {
        node_payload.insert("num".to_string(), Value::from(num));
    }

    let rx_time = packet_rx_time(packet);
    let mut last_heard = node_info
        .as_ref()
        .map(|info| i64::from(info.last_heard))
        .filter(|value| *value != 0)
        .or_else(|| coerce_int(get(decoded, "lastHeard")));
    if last_heard.map(|value| value < rx_time).unwrap_or(true) {
        last_heard = Some(rx_time);
    }
    node_payload.insert(
        "lastHeard".to_string(),
        last_heard.map(Value::from).unwrap_or(Value::Null),
    );

    let snr = node_info
        .as_ref()
        .map(|info| f64::from(info.snr))
        .filter(|value| *value != 0.0)
        .or_else(|| coerce_float(first(packet, &["snr", "rx_snr", "rxSnr"])));
    if let Some(snr) = snr {
        node_payload.insert("snr".to_string(), Value::from(snr));
    }

    let hops = node_info
        .as_ref()
        .and_then(|info| info.hops_away)
        .map(i64::from)
        .or_else(|| coerce_int(get(decoded, "hopsAway")));
    if let Some(hops) = hops {
        node_payload.insert("hopsAway".to_string(), Value::from(hops));
    }

    if let Some(info) = node_info.as_ref() {
        if info.channel != 0 {
            node_payload.insert("channel".to_string(), Value::from(info.channel));
        }
        if info.via_mqtt {
            node_payload.insert("viaMqtt".to_string(), Value::from(true));
        }
        if info.is_ignored {
            node_payload.insert("isIgnored".to_string(), Value::from(true));
        }
        if info.is_key_manually_verified {
            node_payload.insert("isKeyManuallyVerified".to_string(), Value::from(true));
        }
    }

    let favorite = node_info
        .as_ref()
        .map(|info| info.is_favorite)
        .filter(|flag| *flag)
        .or_else(|| {
            get(decoded, "isFavorite").map(|value| {
                value.as_bool().unwrap_or_else(|| !value.is_null())
            })
        });
    if let Some(favorite) = favorite {
        node_payload.insert("isFavorite".to_string(), Value::from(favorite));
    }

    let mut metrics = node_info
        .as_ref()
        .and_then(|info| info.device_metrics.as_ref())
        .map(convert::device_metrics_to_value);
    if let Some(extra) = get(decoded, "deviceMetrics").filter(|value| value.is_object()) {
        metrics = Some(merge_values(metrics.as_ref(), extra));
    }
    if let Some(metrics) = metrics.filter(|value| {
        value
            .as_object()
            .map(|map| !map.is_empty())
            .unwrap_or(false)
    }) {
        node_payload.insert("deviceMetrics".to_string(), metrics);
    }

    let mut position = node_info
        .as_ref()
        .and_then(|info| info.position.as_ref())
        .map(convert::position_to_value);
    if let Some(extra) = get(decoded, "position").filter(|value| value.is_object()) {
        position = Some(merge_values(position.as_ref(), extra));
    }
    if let Some(position) = position.filter(|value| {
        value
            .as_object()
            .map(|map| !map.is_empty())
            .unwrap_or(false)
    }) {
        node_payload.insert("position".to_string(), position);
    }

    if !node_payload.contains_key("hopLimit") {
        if let Some(hop_limit) = coerce_int(first(packet, &["hopLimit", "hop_limit"])) {
            node_payload.insert("hopLimit".to_string(), Value::from(hop_limit));
        }
    }

    let mut payload = Map::new();
    payload.insert(node_id.clone(), Value::Object(node_payload));
    state.radio.apply_to_nodes(&mut payload);

    state
        .queue
        .enqueue("/api/nodes", Value::Object(payload), NODE_POST_PRIORITY)
        .await;
}
