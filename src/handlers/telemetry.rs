//! Telemetry records for `/api/telemetry`.

use crate::handlers::packet_rx_time;
use crate::packet::node_id::{canonical_node_id, node_num_from_id};
use crate::packet::value::{
    base64_payload, coerce_float, coerce_int, extract_payload_bytes, first, get, iso,
};
use crate::queue::TELEMETRY_POST_PRIORITY;
use crate::state::SharedState;
use log::debug;
use serde_json::{Map, Value};

/// Normalises a telemetry packet and queues it for upload.
///
/// Telemetry originating from the host radio is rate limited to one accepted
/// packet per hour; suppressed packets leave the acceptance window untouched.
pub async fn store_telemetry_packet(state: &SharedState, packet: &Value, decoded: &Value) {
    let Some(telemetry) = get(decoded, "telemetry").filter(|value| value.is_object()) else {
        return;
    };

    let Some(pkt_id) = coerce_int(first(packet, &["id", "packet_id", "packetId"])) else {
        state.record_ignored(packet, "missing-packet-id");
        return;
    };

    let raw_from = first(packet, &["fromId", "from_id", "from"]);
    let node_id = canonical_node_id(raw_from);
    let node_num = coerce_int(first(decoded, &["num", "node_num"])).or_else(|| match &node_id {
        Some(id) => node_num_from_id(Some(&Value::from(id.as_str()))),
        None => node_num_from_id(raw_from),
    });

    let to_id = first(packet, &["toId", "to_id", "to"]);
    let rx_time = packet_rx_time(packet);
    let rx_iso = iso(rx_time);

    if let (Some(host_id), Some(node)) = (state.host_node_id(), node_id.as_deref()) {
        if host_id == node {
            if let Some(minutes_remaining) = state.accept_host_telemetry(rx_time) {
                debug!(
                    "Suppressed host telemetry update host_node_id={host_id} \
                     minutes_remaining={minutes_remaining}"
                );
                return;
            }
        }
    }

    let telemetry_time = coerce_int(first(telemetry, &["time"]));
    let channel = coerce_int(first(decoded, &["channel"]))
        .or_else(|| coerce_int(first(packet, &["channel"])))
        .unwrap_or(0);
    let portnum = first(decoded, &["portnum"]).map(|value| match value {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    });
    let bitfield = coerce_int(first(decoded, &["bitfield"]));
    let snr = coerce_float(first(packet, &["snr", "rx_snr", "rxSnr"]));
    let rssi = coerce_int(first(packet, &["rssi", "rx_rssi", "rxRssi"]));
    let hop_limit = coerce_int(first(packet, &["hopLimit", "hop_limit"]));
    let payload_b64 = base64_payload(extract_payload_bytes(decoded).as_deref()).unwrap_or_default();

    let float_field = |paths: &[&str]| coerce_float(first(telemetry, paths));
    let int_field = |paths: &[&str]| coerce_int(first(telemetry, paths));

    let battery_level = float_field(&[
        "batteryLevel",
        "battery_level",
        "deviceMetrics.batteryLevel",
        "environmentMetrics.battery_level",
        "deviceMetrics.battery_level",
    ]);
    let voltage = float_field(&["voltage", "environmentMetrics.voltage", "deviceMetrics.voltage"]);
    let channel_utilization = float_field(&[
        "channelUtilization",
        "channel_utilization",
        "deviceMetrics.channelUtilization",
        "deviceMetrics.channel_utilization",
    ]);
    let air_util_tx = float_field(&[
        "airUtilTx",
        "air_util_tx",
        "deviceMetrics.airUtilTx",
        "deviceMetrics.air_util_tx",
    ]);
    let uptime_seconds = int_field(&[
        "uptimeSeconds",
        "uptime_seconds",
        "deviceMetrics.uptimeSeconds",
        "deviceMetrics.uptime_seconds",
    ]);
    let temperature = float_field(&["temperature", "environmentMetrics.temperature"]);
    let relative_humidity = float_field(&[
        "relativeHumidity",
        "relative_humidity",
        "environmentMetrics.relativeHumidity",
        "environmentMetrics.relative_humidity",
    ]);
    let barometric_pressure = float_field(&[
        "barometricPressure",
        "barometric_pressure",
        "environmentMetrics.barometricPressure",
        "environmentMetrics.barometric_pressure",
    ]);
    let current = float_field(&[
        "current",
        "deviceMetrics.current",
        "deviceMetrics.current_ma",
        "deviceMetrics.currentMa",
        "environmentMetrics.current",
    ]);
    let gas_resistance = float_field(&[
        "gasResistance",
        "gas_resistance",
        "environmentMetrics.gasResistance",
        "environmentMetrics.gas_resistance",
    ]);
    let iaq = int_field(&[
        "iaq",
        "environmentMetrics.iaq",
        "environmentMetrics.iaqIndex",
        "environmentMetrics.iaq_index",
    ]);
    let distance = float_field(&[
        "distance",
        "environmentMetrics.distance",
        "environmentMetrics.range",
        "environmentMetrics.rangeMeters",
    ]);
    let lux = float_field(&["lux", "environmentMetrics.lux", "environmentMetrics.illuminance"]);
    let white_lux = float_field(&[
        "whiteLux",
        "white_lux",
        "environmentMetrics.whiteLux",
        "environmentMetrics.white_lux",
    ]);
    let ir_lux = float_field(&[
        "irLux",
        "ir_lux",
        "environmentMetrics.irLux",
        "environmentMetrics.ir_lux",
    ]);
    let uv_lux = float_field(&[
        "uvLux",
        "uv_lux",
        "environmentMetrics.uvLux",
        "environmentMetrics.uv_lux",
        "environmentMetrics.uvIndex",
    ]);
    let wind_direction = int_field(&[
        "windDirection",
        "wind_direction",
        "environmentMetrics.windDirection",
        "environmentMetrics.wind_direction",
    ]);
    let wind_speed = float_field(&[
        "windSpeed",
        "wind_speed",
        "environmentMetrics.windSpeed",
        "environmentMetrics.wind_speed",
        "environmentMetrics.windSpeedMps",
    ]);
    let wind_gust = float_field(&[
        "windGust",
        "wind_gust",
        "environmentMetrics.windGust",
        "environmentMetrics.wind_gust",
    ]);
    let wind_lull = float_field(&[
        "windLull",
        "wind_lull",
        "environmentMetrics.windLull",
        "environmentMetrics.wind_lull",
    ]);
    let weight = float_field(&["weight", "environmentMetrics.weight", "environmentMetrics.mass"]);
    let radiation = float_field(&[
        "radiation",
        "environmentMetrics.radiation",
        "environmentMetrics.radiationLevel",
    ]);
    let rainfall_1h = float_field(&[
        "rainfall1h",
        "rainfall_1h",
        "environmentMetrics.rainfall1h",
        "environmentMetrics.rainfall_1h",
        "environmentMetrics.rainfallOneHour",
    ]);
    let rainfall_24h = float_field(&[
        "rainfall24h",
        "rainfall_24h",
        "environmentMetrics.rainfall24h",
        "environmentMetrics.rainfall_24h",
        "environmentMetrics.rainfallTwentyFourHour",
    ]);
    let soil_moisture = int_field(&[
        "soilMoisture",
        "soil_moisture",
        "environmentMetrics.soilMoisture",
        "environmentMetrics.soil_moisture",
    ]);
    let soil_temperature = float_field(&[
        "soilTemperature",
        "soil_temperature",
        "environmentMetrics.soilTemperature",
        "environmentMetrics.soil_temperature",
    ]);

    let mut payload = Map::new();
    payload.insert("id".to_string(), Value::from(pkt_id));
    payload.insert(
        "node_id".to_string(),
        node_id.clone().map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "node_num".to_string(),
        node_num.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "from_id".to_string(),
        node_id
            .map(Value::from)
            .or_else(|| raw_from.cloned())
            .unwrap_or(Value::Null),
    );
    payload.insert("to_id".to_string(), to_id.cloned().unwrap_or(Value::Null));
    payload.insert("rx_time".to_string(), Value::from(rx_time));
    payload.insert("rx_iso".to_string(), Value::from(rx_iso));
    payload.insert(
        "telemetry_time".to_string(),
        telemetry_time.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert("channel".to_string(), Value::from(channel));
    payload.insert(
        "portnum".to_string(),
        portnum.map(Value::from).unwrap_or(Value::Null),
    );
    payload.insert(
        "bitfield".to_string(),
        bitfield.map(Value::from).unwrap_or(Value::Null),
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
    payload.insert("payload_b64".to_string(), Value::from(payload_b64));

    let mut put_optional = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            payload.insert(key.to_string(), value);
        }
    };
    put_optional("battery_level", battery_level.map(Value::from));
    put_optional("voltage", voltage.map(Value::from));
    put_optional("channel_utilization", channel_utilization.map(Value::from));
    put_optional("air_util_tx", air_util_tx.map(Value::from));
    put_optional("uptime_seconds", uptime_seconds.map(Value::from));
    put_optional("temperature", temperature.map(Value::from));
    put_optional("relative_humidity", relative_humidity.map(Value::from));
    put_optional("barometric_pressure", barometric_pressure.map(Value::from));
    put_optional("current", current.map(Value::from));
    put_optional("gas_resistance", gas_resistance.map(Value::from));
    put_optional("iaq", iaq.map(Value::from));
    put_optional("distance", distance.map(Value::from));
    put_optional("lux", lux.map(Value::from));
    put_optional("white_lux", white_lux.map(Value::from));
    put_optional("ir_lux", ir_lux.map(Value::from));
    put_optional("uv_lux", uv_lux.map(Value::from));
    put_optional("wind_direction", wind_direction.map(Value::from));
    put_optional("wind_speed", wind_speed.map(Value::from));
    put_optional("wind_gust", wind_gust.map(Value::from));
    put_optional("wind_lull", wind_lull.map(Value::from));
    put_optional("weight", weight.map(Value::from));
    put_optional("radiation", radiation.map(Value::from));
    put_optional("rainfall_1h", rainfall_1h.map(Value::from));
    put_optional("rainfall_24h", rainfall_24h.map(Value::from));
    put_optional("soil_moisture", soil_moisture.map(Value::from));
    put_optional("soil_temperature", soil_temperature.map(Value::from));

    state.radio.apply(&mut payload);
    state
        .queue
        .enqueue(
            "/api/telemetry",
            Value::Object(payload),
            TELEMETRY_POST_PRIORITY,
        )
        .await;
}
