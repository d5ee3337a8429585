//! Position records for `/api/positions`.

use crate::handlers::packet_rx_time;
use crate::packet::node_id::{canonical_node_id, node_num_from_id};
use crate::packet::value::{
    base64_payload, coerce_float, coerce_int, extract_payload_bytes, first, get, iso,
};
use crate::queue::POSITION_POST_PRIORITY;
use crate::state::SharedState;
use log::debug;
use serde_json::{json, Map, Value};

/// Normalises a decoded position packet and queues it for upload.
pub async fn store_position_packet(state: &SharedState, packet: &Value, decoded: &Value) {
    let node_ref = first(packet, &["fromId", "from_id", "from"]).or_else(|| first(decoded, &["num"]));
    let Some(node_id) = canonical_node_id(node_ref) else {
        debug!("Dropping position packet without a resolvable node id");
        return;
    };

    let node_num = coerce_int(first(decoded, &["num"]))
        .or_else(|| node_num_from_id(Some(&Value::from(node_id.clone()))));

    let Some(pkt_id) = coerce_int(first(packet, &["id", "packet_id", "packetId"])) else {
        state.record_ignored(packet, "missing-packet-id");
        return;
    };
    let rx_time = packet_rx_time(packet);

    let to_id = first(packet, &["toId", "to_id", "to"]);

    let empty = json!({});
    let position = get(decoded, "position")
        .filter(|value| value.is_object())
        .unwrap_or(&empty);

    let latitude = coerce_float(first(position, &["latitude", "raw.latitude"])).or_else(|| {
        coerce_int(first(
            position,
            &["latitudeI", "latitude_i", "raw.latitude_i"],
        ))
        .map(|lat_i| lat_i as f64 / 1e7)
    });
    let longitude = coerce_float(first(position, &["longitude", "raw.longitude"])).or_else(|| {
        coerce_int(first(
            position,
            &["longitudeI", "longitude_i", "raw.longitude_i"],
        ))
        .map(|lon_i| lon_i as f64 / 1e7)
    });

    let altitude = coerce_float(first(position, &["altitude", "raw.altitude"]));
    let position_time = coerce_int(first(position, &["time", "raw.time"]));
    let location_source = first(
        position,
        &["locationSource", "location_source", "raw.location_source"],
    )
    .and_then(Value::as_str)
    .map(|text| text.trim().to_string())
    .filter(|text| !text.is_empty());
    let precision_bits = coerce_int(first(
        position,
        &["precisionBits", "precision_bits", "raw.precision_bits"],
    ));
    let sats_in_view = coerce_int(first(
        position,
        &["satsInView", "sats_in_view", "raw.sats_in_view"],
    ));
    let pdop = coerce_float(first(position, &["PDOP", "pdop", "raw.PDOP", "raw.pdop"]));
    let ground_speed = coerce_float(first(
        position,
        &["groundSpeed", "ground_speed", "raw.ground_speed"],
    ));
    let ground_track = coerce_float(first(
        position,
        &["groundTrack", "ground_track", "raw.ground_track"],
    ));

    let snr = coerce_float(first(packet, &["snr", "rx_snr", "rxSnr"]));
    let rssi = coerce_int(first(packet, &["rssi", "rx_rssi", "rxRssi"]));
    let hop_limit = coerce_int(first(packet, &["hopLimit", "hop_limit"]));
    let bitfield = coerce_int(first(decoded, &["bitfield"]));

    let payload_bytes = extract_payload_bytes(decoded);
    let payload_b64 = base64_payload(payload_bytes.as_deref());

    let raw_payload = get(decoded, "raw")
        .filter(|value| value.is_object())
        .or_else(|| get(position, "raw").filter(|value| value.is_object()))
        .cloned();

    let mut payload = Map::new();
    payload.insert("id".to_string(), Value::from(pkt_id));
    payload.insert("node_id".to_string(), Value::from(node_id.clone()));
    payload.insert(
        "node_num".to_string(),
        node_num.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "num".to_string(),
        node_num.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert("from_id".to_string(), Value::from(node_id));
    payload.insert("to_id".to_string(), to_id.cloned().unwrap_or(Value::Null));
    payload.insert("rx_time".to_string(), Value::from(rx_time));
    payload.insert("rx_iso".to_string(), Value::from(iso(rx_time)));
    payload.insert(
        "latitude".to_string(),
        latitude.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "longitude".to_string(),
        longitude.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "altitude".to_string(),
        altitude.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "position_time".to_string(),
        position_time.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "location_source".to_string(),
        location_source.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "precision_bits".to_string(),
        precision_bits.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "sats_in_view".to_string(),
        sats_in_view.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "pdop".to_string(),
        pdop.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "ground_speed".to_string(),
        ground_speed.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "ground_track".to_string(),
        ground_track.map(Value::from).unwrap_or(Value::Null),
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
        "bitfield".to_string(),
        bitfield.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "payload_b64".to_string(),
        payload_b64.map(Value::from).unwrap_or(Value::Null),
    );
    if let Some(raw) = raw_payload {
        payload.insert("raw".to_string(), raw);
    }

    state.radio.apply(&mut payload);
    state
        .queue
        .enqueue(
            "/api/positions",
            Value::Object(payload),
            POSITION_POST_PRIORITY,
        )
        .await;
}
