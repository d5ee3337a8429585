//! Standalone protobuf payload decoding for the `decode_payload` utility.
//!
//! Emits the wire field names (snake_case) so the output can be diffed
//! against the upstream protobuf definitions directly.

use crate::proto;
use base64::Engine;
use prost::Message;
use serde_json::{json, Map, Value};

/// Portnums the utility understands.
const SUPPORTED: &[(i64, &str)] = &[
    (3, "POSITION_APP"),
    (4, "NODEINFO_APP"),
    (5, "ROUTING_APP"),
    (67, "TELEMETRY_APP"),
    (70, "TRACEROUTE_APP"),
    (71, "NEIGHBORINFO_APP"),
];

/// Decodes one payload, returning either the decoded mapping or an error
/// object mirroring the input contract.
pub fn decode_payload(portnum: i64, payload_b64: &str) -> Value {
    let Some((_, type_name)) = SUPPORTED.iter().find(|(num, _)| *num == portnum) else {
        return json!({"error": "unsupported-port", "portnum": portnum});
    };

    let payload_bytes = match base64::engine::general_purpose::STANDARD.decode(payload_b64) {
        Ok(bytes) => bytes,
        Err(err) => return json!({"error": format!("invalid-payload: {err}")}),
    };

    let decoded = match portnum {
        3 => proto::Position::decode(payload_bytes.as_slice()).map(|msg| position_snake(&msg)),
        4 => proto::NodeInfo::decode(payload_bytes.as_slice()).map(|msg| node_info_snake(&msg)),
        5 => proto::Routing::decode(payload_bytes.as_slice()).map(|msg| routing_snake(&msg)),
        67 => proto::Telemetry::decode(payload_bytes.as_slice()).map(|msg| telemetry_snake(&msg)),
        70 => proto::RouteDiscovery::decode(payload_bytes.as_slice())
            .map(|msg| route_discovery_snake(&msg)),
        71 => proto::NeighborInfo::decode(payload_bytes.as_slice())
            .map(|msg| neighbor_info_snake(&msg)),
        _ => unreachable!("filtered by SUPPORTED"),
    };

    match decoded {
        Ok(payload) => json!({
            "portnum": portnum,
            "type": type_name,
            "payload": payload,
        }),
        Err(err) => json!({
            "error": format!("decode-failed: {err}"),
            "portnum": portnum,
            "type": type_name,
        }),
    }
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn position_snake(position: &proto::Position) -> Value {
    let mut map = Map::new();
    if let Some(lat) = position.latitude_i {
        map.insert("latitude_i".to_string(), json!(lat));
    }
    if let Some(lon) = position.longitude_i {
        map.insert("longitude_i".to_string(), json!(lon));
    }
    if let Some(alt) = position.altitude {
        map.insert("altitude".to_string(), json!(alt));
    }
    if position.time != 0 {
        map.insert("time".to_string(), json!(position.time));
    }
    if let Ok(source) = proto::LocationSource::try_from(position.location_source) {
        if source != proto::LocationSource::LocUnset {
            map.insert("location_source".to_string(), json!(source.name()));
        }
    }
    if position.pdop != 0 {
        map.insert("PDOP".to_string(), json!(position.pdop));
    }
    if let Some(speed) = position.ground_speed {
        map.insert("ground_speed".to_string(), json!(speed));
    }
    if let Some(track) = position.ground_track {
        map.insert("ground_track".to_string(), json!(track));
    }
    if position.sats_in_view != 0 {
        map.insert("sats_in_view".to_string(), json!(position.sats_in_view));
    }
    if position.precision_bits != 0 {
        map.insert("precision_bits".to_string(), json!(position.precision_bits));
    }
    Value::Object(map)
}

fn user_snake(user: &proto::User) -> Value {
    let mut map = Map::new();
    if !user.id.is_empty() {
        map.insert("id".to_string(), json!(user.id));
    }
    if !user.long_name.is_empty() {
        map.insert("long_name".to_string(), json!(user.long_name));
    }
    if !user.short_name.is_empty() {
        map.insert("short_name".to_string(), json!(user.short_name));
    }
    if !user.macaddr.is_empty() {
        map.insert("macaddr".to_string(), json!(b64(&user.macaddr)));
    }
    if user.hw_model != 0 {
        map.insert("hw_model".to_string(), json!(user.hw_model));
    }
    if user.is_licensed {
        map.insert("is_licensed".to_string(), json!(true));
    }
    if user.role != 0 {
        match proto::role_name(user.role) {
            Some(name) => map.insert("role".to_string(), json!(name)),
            None => map.insert("role".to_string(), json!(user.role)),
        };
    }
    if !user.public_key.is_empty() {
        map.insert("public_key".to_string(), json!(b64(&user.public_key)));
    }
    Value::Object(map)
}

fn device_metrics_snake(metrics: &proto::DeviceMetrics) -> Value {
    let mut map = Map::new();
    if let Some(level) = metrics.battery_level {
        map.insert("battery_level".to_string(), json!(level));
    }
    if let Some(voltage) = metrics.voltage {
        map.insert("voltage".to_string(), json!(voltage));
    }
    if let Some(utilization) = metrics.channel_utilization {
        map.insert("channel_utilization".to_string(), json!(utilization));
    }
    if let Some(air_util) = metrics.air_util_tx {
        map.insert("air_util_tx".to_string(), json!(air_util));
    }
    if let Some(uptime) = metrics.uptime_seconds {
        map.insert("uptime_seconds".to_string(), json!(uptime));
    }
    Value::Object(map)
}

fn environment_metrics_snake(metrics: &proto::EnvironmentMetrics) -> Value {
    let mut map = Map::new();
    macro_rules! put {
        ($field:ident) => {
            if let Some(value) = metrics.$field {
                map.insert(stringify!($field).to_string(), json!(value));
            }
        };
    }
    put!(temperature);
    put!(relative_humidity);
    put!(barometric_pressure);
    put!(gas_resistance);
    put!(voltage);
    put!(current);
    put!(iaq);
    put!(distance);
    put!(lux);
    put!(white_lux);
    put!(ir_lux);
    put!(uv_lux);
    put!(wind_direction);
    put!(wind_speed);
    put!(weight);
    put!(wind_gust);
    put!(wind_lull);
    put!(radiation);
    put!(rainfall_1h);
    put!(rainfall_24h);
    put!(soil_moisture);
    put!(soil_temperature);
    Value::Object(map)
}

fn node_info_snake(info: &proto::NodeInfo) -> Value {
    let mut map = Map::new();
    if info.num != 0 {
        map.insert("num".to_string(), json!(info.num));
    }
    if let Some(user) = &info.user {
        map.insert("user".to_string(), user_snake(user));
    }
    if let Some(position) = &info.position {
        map.insert("position".to_string(), position_snake(position));
    }
    if info.snr != 0.0 {
        map.insert("snr".to_string(), json!(info.snr));
    }
    if info.last_heard != 0 {
        map.insert("last_heard".to_string(), json!(info.last_heard));
    }
    if let Some(metrics) = &info.device_metrics {
        map.insert("device_metrics".to_string(), device_metrics_snake(metrics));
    }
    if info.channel != 0 {
        map.insert("channel".to_string(), json!(info.channel));
    }
    if info.via_mqtt {
        map.insert("via_mqtt".to_string(), json!(true));
    }
    if let Some(hops) = info.hops_away {
        map.insert("hops_away".to_string(), json!(hops));
    }
    if info.is_favorite {
        map.insert("is_favorite".to_string(), json!(true));
    }
    if info.is_ignored {
        map.insert("is_ignored".to_string(), json!(true));
    }
    if info.is_key_manually_verified {
        map.insert("is_key_manually_verified".to_string(), json!(true));
    }
    Value::Object(map)
}

fn routing_snake(routing: &proto::Routing) -> Value {
    let mut map = Map::new();
    match &routing.variant {
        Some(proto::routing::Variant::RouteRequest(route)) => {
            map.insert("route_request".to_string(), route_discovery_snake(route));
        }
        Some(proto::routing::Variant::RouteReply(route)) => {
            map.insert("route_reply".to_string(), route_discovery_snake(route));
        }
        Some(proto::routing::Variant::ErrorReason(reason)) => {
            map.insert("error_reason".to_string(), json!(reason));
        }
        None => {}
    }
    Value::Object(map)
}

fn telemetry_snake(telemetry: &proto::Telemetry) -> Value {
    let mut map = Map::new();
    if telemetry.time != 0 {
        map.insert("time".to_string(), json!(telemetry.time));
    }
    match &telemetry.variant {
        Some(proto::telemetry::Variant::DeviceMetrics(metrics)) => {
            map.insert("device_metrics".to_string(), device_metrics_snake(metrics));
        }
        Some(proto::telemetry::Variant::EnvironmentMetrics(metrics)) => {
            map.insert(
                "environment_metrics".to_string(),
                environment_metrics_snake(metrics),
            );
        }
        None => {}
    }
    Value::Object(map)
}

fn route_discovery_snake(route: &proto::RouteDiscovery) -> Value {
    let mut map = Map::new();
    if !route.route.is_empty() {
        map.insert("route".to_string(), json!(route.route));
    }
    if !route.snr_towards.is_empty() {
        map.insert("snr_towards".to_string(), json!(route.snr_towards));
    }
    if !route.route_back.is_empty() {
        map.insert("route_back".to_string(), json!(route.route_back));
    }
    if !route.snr_back.is_empty() {
        map.insert("snr_back".to_string(), json!(route.snr_back));
    }
    Value::Object(map)
}

fn neighbor_info_snake(info: &proto::NeighborInfo) -> Value {
    let mut map = Map::new();
    if info.node_id != 0 {
        map.insert("node_id".to_string(), json!(info.node_id));
    }
    if info.last_sent_by_id != 0 {
        map.insert("last_sent_by_id".to_string(), json!(info.last_sent_by_id));
    }
    if info.node_broadcast_interval_secs != 0 {
        map.insert(
            "node_broadcast_interval_secs".to_string(),
            json!(info.node_broadcast_interval_secs),
        );
    }
    let neighbors: Vec<Value> = info
        .neighbors
        .iter()
        .map(|entry| {
            let mut neighbor = Map::new();
            if entry.node_id != 0 {
                neighbor.insert("node_id".to_string(), json!(entry.node_id));
            }
            if entry.snr != 0.0 {
                neighbor.insert("snr".to_string(), json!(entry.snr));
            }
            if entry.last_rx_time != 0 {
                neighbor.insert("last_rx_time".to_string(), json!(entry.last_rx_time));
            }
            Value::Object(neighbor)
        })
        .collect();
    if !neighbors.is_empty() {
        map.insert("neighbors".to_string(), Value::Array(neighbors));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_port_is_reported() {
        let result = decode_payload(42, "");
        assert_eq!(result["error"], "unsupported-port");
        assert_eq!(result["portnum"], 42);
    }

    #[test]
    fn invalid_base64_is_reported() {
        let result = decode_payload(3, "not base64!!!");
        assert!(result["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid-payload"));
    }

    #[test]
    fn position_payload_roundtrips() {
        let position = proto::Position {
            latitude_i: Some(525598720),
            longitude_i: Some(136577024),
            altitude: Some(30),
            time: 1_700_000_000,
            ..Default::default()
        };
        let encoded = b64(&position.encode_to_vec());
        let result = decode_payload(3, &encoded);
        assert_eq!(result["type"], "POSITION_APP");
        assert_eq!(result["payload"]["latitude_i"], 525598720);
        assert_eq!(result["payload"]["altitude"], 30);
    }

    #[test]
    fn neighborinfo_payload_roundtrips() {
        let info = proto::NeighborInfo {
            node_id: 7,
            neighbors: vec![proto::Neighbor {
                node_id: 8,
                snr: 5.5,
                ..Default::default()
            }],
            ..Default::default()
        };
        let encoded = b64(&info.encode_to_vec());
        let result = decode_payload(71, &encoded);
        assert_eq!(result["type"], "NEIGHBORINFO_APP");
        assert_eq!(result["payload"]["neighbors"][0]["node_id"], 8);
    }
}
