//! Projections from decoded protobuf messages into the JSON packet trees the
//! handlers consume.
//!
//! Keys follow the camelCase surface emitted by the stock Meshtastic drivers
//! (`latitudeI`, `deviceMetrics`, ...); a snake_case `raw` subsection is kept
//! on position packets for consumers that expect the wire field names.

use crate::proto;
use base64::Engine;
use prost::Message;
use serde_json::{json, Map, Value};

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Converts a decoded `MeshPacket` into the packet tree handed to handlers.
pub fn mesh_packet_to_value(packet: &proto::MeshPacket) -> Value {
    let mut map = Map::new();
    map.insert("from".to_string(), json!(packet.from));
    map.insert(
        "fromId".to_string(),
        Value::String(format!("!{:08x}", packet.from)),
    );
    map.insert("to".to_string(), json!(packet.to));
    let to_id = if packet.to == proto::BROADCAST_NUM {
        "^all".to_string()
    } else {
        format!("!{:08x}", packet.to)
    };
    map.insert("toId".to_string(), Value::String(to_id));
    if packet.id != 0 {
        map.insert("id".to_string(), json!(packet.id));
    }
    if packet.rx_time != 0 {
        map.insert("rxTime".to_string(), json!(packet.rx_time));
    }
    if packet.channel != 0 {
        map.insert("channel".to_string(), json!(packet.channel));
    }
    if packet.rx_snr != 0.0 {
        map.insert("rxSnr".to_string(), json!(packet.rx_snr));
    }
    if packet.rx_rssi != 0 {
        map.insert("rxRssi".to_string(), json!(packet.rx_rssi));
    }
    if packet.hop_limit != 0 {
        map.insert("hopLimit".to_string(), json!(packet.hop_limit));
    }
    if packet.via_mqtt {
        map.insert("viaMqtt".to_string(), json!(true));
    }
    match &packet.payload_variant {
        Some(proto::mesh_packet::PayloadVariant::Decoded(data)) => {
            map.insert("decoded".to_string(), data_to_value(data));
        }
        Some(proto::mesh_packet::PayloadVariant::Encrypted(bytes)) => {
            map.insert("encrypted".to_string(), Value::String(b64(bytes)));
        }
        None => {}
    }
    Value::Object(map)
}

/// Converts a `Data` section, attaching the per-portnum decoded view.
pub fn data_to_value(data: &proto::Data) -> Value {
    let mut map = Map::new();
    let portnum = proto::PortNum::try_from(data.portnum).ok();
    match portnum {
        Some(port) => {
            map.insert("portnum".to_string(), Value::String(port.name().to_string()));
        }
        None => {
            map.insert("portnum".to_string(), json!(data.portnum));
        }
    }
    if !data.payload.is_empty() {
        map.insert("payload".to_string(), Value::String(b64(&data.payload)));
    }
    if let Some(bitfield) = data.bitfield {
        map.insert("bitfield".to_string(), json!(bitfield));
    }
    if data.request_id != 0 {
        map.insert("requestId".to_string(), json!(data.request_id));
    }
    if data.reply_id != 0 {
        map.insert("replyId".to_string(), json!(data.reply_id));
    }
    if data.emoji != 0 {
        map.insert("emoji".to_string(), json!(data.emoji));
    }

    match portnum {
        Some(proto::PortNum::TextMessageApp) => {
            if let Ok(text) = std::str::from_utf8(&data.payload) {
                map.insert("text".to_string(), Value::String(text.to_string()));
            }
        }
        Some(proto::PortNum::PositionApp) => {
            if let Ok(position) = proto::Position::decode(data.payload.as_slice()) {
                map.insert("position".to_string(), position_to_value(&position));
            }
        }
        Some(proto::PortNum::NodeinfoApp) => {
            if let Ok(user) = proto::User::decode(data.payload.as_slice()) {
                map.insert("user".to_string(), user_to_value(&user));
            }
        }
        Some(proto::PortNum::TelemetryApp) => {
            if let Ok(telemetry) = proto::Telemetry::decode(data.payload.as_slice()) {
                map.insert("telemetry".to_string(), telemetry_to_value(&telemetry));
            }
        }
        Some(proto::PortNum::TracerouteApp) => {
            if let Ok(route) = proto::RouteDiscovery::decode(data.payload.as_slice()) {
                map.insert("traceroute".to_string(), route_discovery_to_value(&route));
            }
        }
        Some(proto::PortNum::NeighborinfoApp) => {
            if let Ok(info) = proto::NeighborInfo::decode(data.payload.as_slice()) {
                map.insert("neighborinfo".to_string(), neighbor_info_to_value(&info));
            }
        }
        _ => {}
    }
    Value::Object(map)
}

/// camelCase projection of a `User` message.
pub fn user_to_value(user: &proto::User) -> Value {
    let mut map = Map::new();
    if !user.id.is_empty() {
        map.insert("id".to_string(), Value::String(user.id.clone()));
    }
    if !user.long_name.is_empty() {
        map.insert("longName".to_string(), Value::String(user.long_name.clone()));
    }
    if !user.short_name.is_empty() {
        map.insert(
            "shortName".to_string(),
            Value::String(user.short_name.clone()),
        );
    }
    if !user.macaddr.is_empty() {
        map.insert("macaddr".to_string(), Value::String(b64(&user.macaddr)));
    }
    if user.hw_model != 0 {
        map.insert("hwModel".to_string(), json!(user.hw_model));
    }
    if user.is_licensed {
        map.insert("isLicensed".to_string(), json!(true));
    }
    if user.role != 0 {
        match proto::role_name(user.role) {
            Some(name) => {
                map.insert("role".to_string(), Value::String(name.to_string()));
            }
            None => {
                map.insert("role".to_string(), json!(user.role));
            }
        }
    }
    if !user.public_key.is_empty() {
        map.insert("publicKey".to_string(), Value::String(b64(&user.public_key)));
    }
    Value::Object(map)
}

/// camelCase projection of a `Position`, with a snake_case `raw` subsection.
pub fn position_to_value(position: &proto::Position) -> Value {
    let mut map = Map::new();
    let mut raw = Map::new();
    if let Some(lat) = position.latitude_i {
        map.insert("latitudeI".to_string(), json!(lat));
        map.insert("latitude".to_string(), json!(lat as f64 / 1e7));
        raw.insert("latitude_i".to_string(), json!(lat));
    }
    if let Some(lon) = position.longitude_i {
        map.insert("longitudeI".to_string(), json!(lon));
        map.insert("longitude".to_string(), json!(lon as f64 / 1e7));
        raw.insert("longitude_i".to_string(), json!(lon));
    }
    if let Some(alt) = position.altitude {
        map.insert("altitude".to_string(), json!(alt));
        raw.insert("altitude".to_string(), json!(alt));
    }
    if position.time != 0 {
        map.insert("time".to_string(), json!(position.time));
        raw.insert("time".to_string(), json!(position.time));
    }
    if let Ok(source) = proto::LocationSource::try_from(position.location_source) {
        if source != proto::LocationSource::LocUnset {
            map.insert(
                "locationSource".to_string(),
                Value::String(source.name().to_string()),
            );
            raw.insert(
                "location_source".to_string(),
                Value::String(source.name().to_string()),
            );
        }
    }
    if position.pdop != 0 {
        map.insert("PDOP".to_string(), json!(position.pdop));
        raw.insert("PDOP".to_string(), json!(position.pdop));
    }
    if let Some(speed) = position.ground_speed {
        map.insert("groundSpeed".to_string(), json!(speed));
        raw.insert("ground_speed".to_string(), json!(speed));
    }
    if let Some(track) = position.ground_track {
        map.insert("groundTrack".to_string(), json!(track));
        raw.insert("ground_track".to_string(), json!(track));
    }
    if position.sats_in_view != 0 {
        map.insert("satsInView".to_string(), json!(position.sats_in_view));
        raw.insert("sats_in_view".to_string(), json!(position.sats_in_view));
    }
    if position.precision_bits != 0 {
        map.insert("precisionBits".to_string(), json!(position.precision_bits));
        raw.insert("precision_bits".to_string(), json!(position.precision_bits));
    }
    if !raw.is_empty() {
        map.insert("raw".to_string(), Value::Object(raw));
    }
    Value::Object(map)
}

/// camelCase projection of a `Telemetry` message.
pub fn telemetry_to_value(telemetry: &proto::Telemetry) -> Value {
    let mut map = Map::new();
    if telemetry.time != 0 {
        map.insert("time".to_string(), json!(telemetry.time));
    }
    match &telemetry.variant {
        Some(proto::telemetry::Variant::DeviceMetrics(metrics)) => {
            map.insert(
                "deviceMetrics".to_string(),
                device_metrics_to_value(metrics),
            );
        }
        Some(proto::telemetry::Variant::EnvironmentMetrics(metrics)) => {
            map.insert(
                "environmentMetrics".to_string(),
                environment_metrics_to_value(metrics),
            );
        }
        None => {}
    }
    Value::Object(map)
}

/// camelCase projection of `DeviceMetrics`.
pub fn device_metrics_to_value(metrics: &proto::DeviceMetrics) -> Value {
    let mut map = Map::new();
    if let Some(level) = metrics.battery_level {
        map.insert("batteryLevel".to_string(), json!(level));
    }
    if let Some(voltage) = metrics.voltage {
        map.insert("voltage".to_string(), json!(voltage));
    }
    if let Some(utilization) = metrics.channel_utilization {
        map.insert("channelUtilization".to_string(), json!(utilization));
    }
    if let Some(air_util) = metrics.air_util_tx {
        map.insert("airUtilTx".to_string(), json!(air_util));
    }
    if let Some(uptime) = metrics.uptime_seconds {
        map.insert("uptimeSeconds".to_string(), json!(uptime));
    }
    Value::Object(map)
}

fn environment_metrics_to_value(metrics: &proto::EnvironmentMetrics) -> Value {
    let mut map = Map::new();
    macro_rules! put {
        ($field:ident, $key:literal) => {
            if let Some(value) = metrics.$field {
                map.insert($key.to_string(), json!(value));
            }
        };
    }
    put!(temperature, "temperature");
    put!(relative_humidity, "relativeHumidity");
    put!(barometric_pressure, "barometricPressure");
    put!(gas_resistance, "gasResistance");
    put!(voltage, "voltage");
    put!(current, "current");
    put!(iaq, "iaq");
    put!(distance, "distance");
    put!(lux, "lux");
    put!(white_lux, "whiteLux");
    put!(ir_lux, "irLux");
    put!(uv_lux, "uvLux");
    put!(wind_direction, "windDirection");
    put!(wind_speed, "windSpeed");
    put!(weight, "weight");
    put!(wind_gust, "windGust");
    put!(wind_lull, "windLull");
    put!(radiation, "radiation");
    put!(rainfall_1h, "rainfall1h");
    put!(rainfall_24h, "rainfall24h");
    put!(soil_moisture, "soilMoisture");
    put!(soil_temperature, "soilTemperature");
    Value::Object(map)
}

/// camelCase projection of a `RouteDiscovery`.
pub fn route_discovery_to_value(route: &proto::RouteDiscovery) -> Value {
    let mut map = Map::new();
    if !route.route.is_empty() {
        map.insert("route".to_string(), json!(route.route));
    }
    if !route.snr_towards.is_empty() {
        map.insert("snrTowards".to_string(), json!(route.snr_towards));
    }
    if !route.route_back.is_empty() {
        map.insert("routeBack".to_string(), json!(route.route_back));
    }
    if !route.snr_back.is_empty() {
        map.insert("snrBack".to_string(), json!(route.snr_back));
    }
    Value::Object(map)
}

/// camelCase projection of a `NeighborInfo`.
pub fn neighbor_info_to_value(info: &proto::NeighborInfo) -> Value {
    let mut map = Map::new();
    if info.node_id != 0 {
        map.insert("nodeId".to_string(), json!(info.node_id));
    }
    if info.last_sent_by_id != 0 {
        map.insert("lastSentById".to_string(), json!(info.last_sent_by_id));
    }
    if info.node_broadcast_interval_secs != 0 {
        map.insert(
            "nodeBroadcastIntervalSecs".to_string(),
            json!(info.node_broadcast_interval_secs),
        );
    }
    let neighbors: Vec<Value> = info
        .neighbors
        .iter()
        .map(|entry| {
            let mut neighbor = Map::new();
            neighbor.insert("nodeId".to_string(), json!(entry.node_id));
            if entry.snr != 0.0 {
                neighbor.insert("snr".to_string(), json!(entry.snr));
            }
            if entry.last_rx_time != 0 {
                neighbor.insert("lastRxTime".to_string(), json!(entry.last_rx_time));
            }
            Value::Object(neighbor)
        })
        .collect();
    map.insert("neighbors".to_string(), Value::Array(neighbors));
    Value::Object(map)
}

/// camelCase projection of a `NodeInfo` as stored in the node map.
pub fn node_info_to_value(info: &proto::NodeInfo) -> Value {
    let mut map = Map::new();
    map.insert("num".to_string(), json!(info.num));
    if let Some(user) = &info.user {
        map.insert("user".to_string(), user_to_value(user));
    }
    if let Some(position) = &info.position {
        map.insert("position".to_string(), position_to_value(position));
    }
    if info.snr != 0.0 {
        map.insert("snr".to_string(), json!(info.snr));
    }
    if info.last_heard != 0 {
        map.insert("lastHeard".to_string(), json!(info.last_heard));
    }
    if let Some(metrics) = &info.device_metrics {
        map.insert("deviceMetrics".to_string(), device_metrics_to_value(metrics));
    }
    if info.channel != 0 {
        map.insert("channel".to_string(), json!(info.channel));
    }
    if info.via_mqtt {
        map.insert("viaMqtt".to_string(), json!(true));
    }
    if let Some(hops) = info.hops_away {
        map.insert("hopsAway".to_string(), json!(hops));
    }
    if info.is_favorite {
        map.insert("isFavorite".to_string(), json!(true));
    }
    if info.is_ignored {
        map.insert("isIgnored".to_string(), json!(true));
    }
    if info.is_key_manually_verified {
        map.insert("isKeyManuallyVerified".to_string(), json!(true));
    }
    Value::Object(map)
}
