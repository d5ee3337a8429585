//! # Packet Handlers
//!
//! Per-portnum normalisers that turn decoded packets into POST-ready records
//! and push them onto the HTTP queue, plus the receiver glue that feeds them.
//!
//! Dispatch order is telemetry → traceroute → nodeinfo → position →
//! neighborinfo → text/reaction; the section-presence fallbacks let packets
//! with an unknown portnum but a recognisable payload shape through. A packet
//! mapping is dispatched at most once: the receiver brands the map with a
//! sentinel key on first delivery.

mod message;
mod neighbor;
mod nodeinfo;
mod nodes;
mod position;
mod telemetry;
mod traceroute;

pub use message::store_message_packet;
pub use neighbor::store_neighborinfo_packet;
pub use nodeinfo::store_nodeinfo_packet;
pub use nodes::upsert_node;
pub use position::store_position_packet;
pub use telemetry::store_telemetry_packet;
pub use traceroute::store_traceroute_packet;

use crate::packet::value::{coerce_int, first, get};
use crate::proto;
use crate::state::SharedState;
use log::warn;
use serde_json::{Map, Value};

/// Sentinel key marking a packet mapping as already dispatched.
pub const SEEN_KEY: &str = "_potatomesh_seen";

/// Routes a decoded packet to the appropriate storage handler.
pub async fn store_packet(state: &SharedState, packet: &Value) {
    let empty = Value::Object(Map::new());
    let decoded = get(packet, "decoded").unwrap_or(&empty);

    let portnum_raw = first(decoded, &["portnum"]);
    let portnum = portnum_raw.map(|value| match value {
        Value::String(name) => name.to_uppercase(),
        other => other.to_string(),
    });
    let portnum = portnum.as_deref();
    let portnum_int = coerce_int(portnum_raw);

    let has_section = |key: &str| get(decoded, key).map(Value::is_object).unwrap_or(false);

    if portnum == Some("TELEMETRY_APP")
        || portnum_int == Some(proto::PortNum::TelemetryApp as i64)
        || has_section("telemetry")
    {
        store_telemetry_packet(state, packet, decoded).await;
        return;
    }

    if portnum == Some("TRACEROUTE_APP")
        || portnum_int == Some(proto::PortNum::TracerouteApp as i64)
        || has_section("traceroute")
    {
        store_traceroute_packet(state, packet, decoded).await;
        return;
    }

    if portnum == Some("NODEINFO_APP") || portnum_int == Some(proto::PortNum::NodeinfoApp as i64)
    {
        store_nodeinfo_packet(state, packet, decoded).await;
        return;
    }

    if portnum == Some("POSITION_APP") || portnum_int == Some(proto::PortNum::PositionApp as i64) {
        store_position_packet(state, packet, decoded).await;
        return;
    }

    if portnum == Some("NEIGHBORINFO_APP")
        || portnum_int == Some(proto::PortNum::NeighborinfoApp as i64)
        || has_section("neighborinfo")
    {
        store_neighborinfo_packet(state, packet, decoded).await;
        return;
    }

    store_message_packet(state, packet, decoded, portnum, portnum_int).await;
}

/// Receiver callback: dedup, activity stamping, dispatch.
///
/// Errors never propagate past this boundary; a failing packet is logged
/// with its top-level key set only.
pub async fn on_receive(state: &SharedState, packet: &mut Value) {
    if let Value::Object(map) = packet {
        if map.get(SEEN_KEY).and_then(Value::as_bool).unwrap_or(false) {
            return;
        }
        map.insert(SEEN_KEY.to_string(), Value::Bool(true));
    }

    state.mark_packet_seen();

    if !packet.is_object() {
        warn!("Failed to store packet: not a mapping");
        return;
    }
    store_packet(state, packet).await;
}

/// Resolves the packet's receive timestamp, defaulting to the current time.
pub(crate) fn packet_rx_time(packet: &Value) -> i64 {
    coerce_int(first(packet, &["rxTime", "rx_time"])).unwrap_or_else(now_unix)
}

/// Current unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Stringified view of a value used for trimmed-text comparisons.
pub(crate) fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
