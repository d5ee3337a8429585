//! Text message and reaction records for `/api/messages`.

use crate::handlers::{packet_rx_time, value_text};
use crate::packet::node_id::canonical_node_id;
use crate::packet::value::{coerce_float, coerce_int, first, is_encrypted_flag, iso};
use crate::queue::MESSAGE_POST_PRIORITY;
use crate::state::SharedState;
use log::debug;
use serde_json::{Map, Value};

const ALLOWED_PORT_NAMES: &[&str] = &["1", "TEXT_MESSAGE_APP", "REACTION_APP"];
const ALLOWED_PORT_INTS: &[i64] = &[1];

/// Normalises a text or reaction packet and queues it for upload.
///
/// Unsupported portnums, payload-less frames, and unencrypted direct
/// messages on the primary channel are dropped with an ignored-log entry.
pub async fn store_message_packet(
    state: &SharedState,
    packet: &Value,
    decoded: &Value,
    portnum: Option<&str>,
    portnum_int: Option<i64>,
) {
    let text = first(decoded, &["payload.text", "text", "data.text"]);
    let encrypted = first(decoded, &["payload.encrypted", "encrypted"])
        .or_else(|| first(packet, &["encrypted"]));
    let reply_id = coerce_int(first(
        decoded,
        &[
            "payload.replyId",
            "payload.reply_id",
            "data.replyId",
            "data.reply_id",
            "replyId",
            "reply_id",
        ],
    ));
    let emoji = value_text(first(decoded, &["payload.emoji", "data.emoji", "emoji"]))
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let is_reaction = portnum == Some("REACTION_APP") || (reply_id.is_some() && emoji.is_some());

    if let Some(portnum) = portnum {
        let mut allowed = ALLOWED_PORT_NAMES.contains(&portnum)
            || portnum_int.map(|n| ALLOWED_PORT_INTS.contains(&n)).unwrap_or(false);
        // A reaction identified by its payload markers may ride an
        // unregistered portnum value.
        if is_reaction && portnum_int.is_some() {
            allowed = true;
        }
        if !allowed {
            state.record_ignored(packet, "unsupported-port");
            return;
        }
    }

    let encrypted_flag = is_encrypted_flag(encrypted);
    if text.is_none() && !encrypted_flag && emoji.is_none() && reply_id.is_none() {
        state.record_ignored(packet, "no-message-payload");
        return;
    }

    let channel = coerce_int(first(decoded, &["channel"]))
        .or_else(|| coerce_int(first(packet, &["channel"])))
        .unwrap_or(0);

    let Some(pkt_id) = coerce_int(first(packet, &["id", "packet_id", "packetId"])) else {
        state.record_ignored(packet, "missing-packet-id");
        return;
    };
    let rx_time = packet_rx_time(packet);
    let from_id = first(packet, &["fromId", "from_id", "from"]);
    let to_id = first(packet, &["toId", "to_id", "to"]);

    let snr = coerce_float(first(packet, &["snr", "rx_snr", "rxSnr"]));
    let rssi = coerce_int(first(packet, &["rssi", "rx_rssi", "rxRssi"]));
    let hop_limit = coerce_int(first(packet, &["hopLimit", "hop_limit"]));

    // Primary-channel frames that are unencrypted and addressed to a single
    // node are operator noise, not broadcast traffic.
    let to_id_normalized = value_text(to_id)
        .map(|text| text.trim().to_string())
        .unwrap_or_default();
    if !is_reaction
        && channel == 0
        && !encrypted_flag
        && !to_id_normalized.is_empty()
        && to_id_normalized.to_lowercase() != "^all"
    {
        debug!(
            "Skipped direct message on primary channel from={:?} to={:?}",
            canonical_node_id(from_id),
            canonical_node_id(to_id),
        );
        state.record_ignored(packet, "skipped-direct-message");
        return;
    }

    let mut payload = Map::new();
    payload.insert("id".to_string(), Value::from(pkt_id));
    payload.insert("rx_time".to_string(), Value::from(rx_time));
    payload.insert("rx_iso".to_string(), Value::from(iso(rx_time)));
    payload.insert(
        "from_id".to_string(),
        from_id.cloned().unwrap_or(Value::Null),
    );
    payload.insert("to_id".to_string(), to_id.cloned().unwrap_or(Value::Null));
    payload.insert("channel".to_string(), Value::from(channel));
    payload.insert(
        "portnum".to_string(),
        portnum.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert("text".to_string(), text.cloned().unwrap_or(Value::Null));
    payload.insert(
        "encrypted".to_string(),
        encrypted.cloned().unwrap_or(Value::Null),
    );
    payload.insert(
        "snr".to_string(),
        snr.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "rssi".to_string(),
        rssi.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "hop_limit".to_string(),
        hop_limit.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "reply_id".to_string(),
        reply_id.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "emoji".to_string(),
        emoji.map(Value::from).unwrap_or(Value::Null),
    );

    // Channel names are only meaningful for cleartext traffic.
    if !encrypted_flag {
        if let Ok(index) = u32::try_from(channel) {
            if let Some(name) = state.channels.name(index) {
                payload.insert("channel_name".to_string(), Value::from(name));
            }
        }
    }

    state.radio.apply(&mut payload);
    state
        .queue
        .enqueue("/api/messages", Value::Object(payload), MESSAGE_POST_PRIORITY)
        .await;
}
