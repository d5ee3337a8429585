//! End-to-end handler scenarios: packets in, recorded POSTs out.

mod common;

use common::{recording_state, recording_state_with};
use potatomesh_ingest::handlers;
use potatomesh_ingest::IngestConfig;
use serde_json::{json, Value};

#[tokio::test]
async fn text_broadcast_posts_one_message() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 123,
        "rxTime": 1_700_000_000i64,
        "fromId": "!abc",
        "toId": "^all",
        "decoded": {
            "portnum": "TEXT_MESSAGE_APP",
            "payload": {"text": "hi"},
            "channel": 2,
        },
    });

    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    assert_eq!(posts.len(), 1);
    let (path, body) = &posts[0];
    assert_eq!(path, "/api/messages");
    assert_eq!(body["id"], 123);
    assert_eq!(body["text"], "hi");
    assert_eq!(body["channel"], 2);
    assert_eq!(body["rx_iso"], "2023-11-14T22:13:20Z");
    assert_eq!(body["from_id"], "!abc");
}

#[tokio::test]
async fn channel_zero_direct_message_is_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let ignored_path = dir.path().join("ignored.txt");
    let sender = common::RecordingSender::new();
    let state = potatomesh_ingest::SharedState::new(
        IngestConfig {
            debug: true,
            ..Default::default()
        },
        potatomesh_ingest::PostQueue::new(sender.clone()),
    )
    .with_ignored_log_path(ignored_path.clone());

    let packet = json!({
        "id": 124,
        "rxTime": 1_700_000_001i64,
        "fromId": "!abc",
        "toId": "!def",
        "decoded": {
            "portnum": "TEXT_MESSAGE_APP",
            "payload": {"text": "hi"},
            "channel": 0,
        },
    });
    handlers::store_packet(&state, &packet).await;

    assert!(sender.posts.lock().await.is_empty());
    let contents = std::fs::read_to_string(&ignored_path).unwrap();
    let entry: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["reason"], "skipped-direct-message");
}

#[tokio::test]
async fn broadcast_on_channel_zero_is_accepted() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 125,
        "rxTime": 1_700_000_002i64,
        "fromId": "!abc",
        "toId": "^all",
        "decoded": {"portnum": "TEXT_MESSAGE_APP", "payload": {"text": "hello"}, "channel": 0},
    });
    handlers::store_packet(&state, &packet).await;
    assert_eq!(sender.paths().await, vec!["/api/messages"]);
}

#[tokio::test]
async fn encrypted_direct_message_on_channel_zero_is_kept() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 126,
        "rxTime": 1_700_000_003i64,
        "fromId": "!abc",
        "toId": "!def",
        "encrypted": "dGVzdA==",
        "decoded": {"portnum": "TEXT_MESSAGE_APP", "channel": 0},
    });
    handlers::store_packet(&state, &packet).await;
    let posts = sender.posts.lock().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].1["encrypted"], "dGVzdA==");
    // Channel names are withheld for encrypted frames.
    assert!(posts[0].1.get("channel_name").is_none());
}

#[tokio::test]
async fn reaction_markers_bypass_the_dm_filter() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 127,
        "rxTime": 1_700_000_004i64,
        "fromId": "!abc",
        "toId": "!def",
        "decoded": {
            "portnum": "TEXT_MESSAGE_APP",
            "payload": {"replyId": 99, "emoji": 1},
            "channel": 0,
        },
    });
    handlers::store_packet(&state, &packet).await;
    let posts = sender.posts.lock().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].1["reply_id"], 99);
    assert_eq!(posts[0].1["emoji"], "1");
}

#[tokio::test]
async fn unsupported_portnum_is_dropped() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 128,
        "rxTime": 1_700_000_005i64,
        "fromId": "!abc",
        "decoded": {"portnum": "ADMIN_APP", "payload": {"text": "x"}},
    });
    handlers::store_packet(&state, &packet).await;
    assert!(sender.posts.lock().await.is_empty());
}

#[tokio::test]
async fn position_integer_coordinates_are_scaled() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 200,
        "rxTime": 1_700_000_100i64,
        "fromId": "!00000007",
        "decoded": {
            "portnum": "POSITION_APP",
            "position": {"latitudeI": 525598720, "longitudeI": 136577024, "altitude": 11},
        },
    });
    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    assert_eq!(posts.len(), 1);
    let (path, body) = &posts[0];
    assert_eq!(path, "/api/positions");
    assert!((body["latitude"].as_f64().unwrap() - 52.559_872).abs() < 1e-9);
    assert!((body["longitude"].as_f64().unwrap() - 13.657_702_4).abs() < 1e-9);
    assert_eq!(body["altitude"], 11.0);
    assert_eq!(body["node_id"], "!00000007");
    assert_eq!(body["node_num"], 7);
}

#[tokio::test]
async fn position_without_packet_id_is_dropped() {
    let (state, sender) = recording_state();
    let packet = json!({
        "rxTime": 1_700_000_100i64,
        "fromId": "!00000007",
        "decoded": {"portnum": "POSITION_APP", "position": {"latitudeI": 1}},
    });
    handlers::store_packet(&state, &packet).await;
    assert!(sender.posts.lock().await.is_empty());
}

#[tokio::test]
async fn host_telemetry_is_rate_limited_to_one_per_hour() {
    let (state, sender) = recording_state();
    state.register_host_node_id(Some(&json!("!abcd0001")));

    for (id, rx_time) in [(1, 100i64), (2, 200), (3, 3800)] {
        let packet = json!({
            "id": id,
            "rxTime": rx_time,
            "fromId": "!abcd0001",
            "decoded": {
                "portnum": "TELEMETRY_APP",
                "telemetry": {"deviceMetrics": {"batteryLevel": 80}},
            },
        });
        handlers::store_packet(&state, &packet).await;
    }

    let posts = sender.posts.lock().await;
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].1["rx_time"], 100);
    assert_eq!(posts[1].1["rx_time"], 3800);
    assert_eq!(posts[0].1["battery_level"], 80.0);
}

#[tokio::test]
async fn foreign_telemetry_is_never_suppressed() {
    let (state, sender) = recording_state();
    state.register_host_node_id(Some(&json!("!abcd0001")));
    for rx_time in [100i64, 200] {
        let packet = json!({
            "id": rx_time,
            "rxTime": rx_time,
            "fromId": "!00000042",
            "decoded": {"telemetry": {"environmentMetrics": {"temperature": 21.5}}},
        });
        handlers::store_packet(&state, &packet).await;
    }
    assert_eq!(sender.posts.lock().await.len(), 2);
}

#[tokio::test]
async fn telemetry_optional_fields_are_omitted_when_absent() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 1,
        "rxTime": 100,
        "fromId": "!00000042",
        "decoded": {"telemetry": {"deviceMetrics": {"voltage": 3.9}}},
    });
    handlers::store_packet(&state, &packet).await;
    let posts = sender.posts.lock().await;
    let body = &posts[0].1;
    assert_eq!(body["voltage"], 3.9);
    assert!(body.get("temperature").is_none());
    assert!(body.get("battery_level").is_none());
}

#[tokio::test]
async fn neighborinfo_entries_are_flattened() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 300,
        "rxTime": 1_700_000_200i64,
        "fromId": "!0000000a",
        "decoded": {
            "portnum": "NEIGHBORINFO_APP",
            "neighborinfo": {
                "nodeId": 10,
                "nodeBroadcastIntervalSecs": 600,
                "neighbors": [
                    {"nodeId": 11, "snr": 5.5},
                    {"nodeId": "bogus!"},
                ],
            },
        },
    });
    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    let (path, body) = &posts[0];
    assert_eq!(path, "/api/neighbors");
    assert_eq!(body["node_id"], "!0000000a");
    assert_eq!(body["node_broadcast_interval_secs"], 600);
    let neighbors = body["neighbors"].as_array().unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0]["neighbor_id"], "!0000000b");
    assert_eq!(neighbors[0]["snr"], 5.5);
    assert_eq!(neighbors[0]["rx_time"], 1_700_000_200i64);
}

#[tokio::test]
async fn traceroute_hops_are_deduplicated_in_order() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 400,
        "rxTime": 1_700_000_300i64,
        "from": 16,
        "to": 32,
        "decoded": {
            "portnum": "TRACEROUTE_APP",
            "traceroute": {
                "requestId": 77,
                "route": [1, 2],
                "hops": [2, 3],
            },
        },
    });
    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    let (path, body) = &posts[0];
    assert_eq!(path, "/api/traces");
    assert_eq!(body["id"], 400);
    assert_eq!(body["request_id"], 77);
    assert_eq!(body["src"], 16);
    assert_eq!(body["dest"], 32);
    assert_eq!(body["hops"], json!([2, 3, 1]));
}

#[tokio::test]
async fn traceroute_without_identifiers_is_dropped() {
    let (state, sender) = recording_state();
    let packet = json!({
        "rxTime": 1_700_000_300i64,
        "decoded": {"traceroute": {}},
    });
    handlers::store_packet(&state, &packet).await;
    assert!(sender.posts.lock().await.is_empty());
}

#[tokio::test]
async fn receiver_dispatches_a_packet_mapping_at_most_once() {
    let (state, sender) = recording_state();
    let mut packet = json!({
        "id": 500,
        "rxTime": 1_700_000_400i64,
        "fromId": "!abc",
        "toId": "^all",
        "decoded": {"portnum": "TEXT_MESSAGE_APP", "payload": {"text": "once"}, "channel": 1},
    });

    handlers::on_receive(&state, &mut packet).await;
    handlers::on_receive(&state, &mut packet).await;

    assert_eq!(sender.posts.lock().await.len(), 1);
    assert!(state.last_packet().is_some());
}

#[tokio::test]
async fn radio_metadata_is_merged_into_records() {
    let (state, sender) = recording_state_with(IngestConfig::default());
    state.radio.capture(&potatomesh_ingest::proto::LoRaConfig {
        region: potatomesh_ingest::proto::RegionCode::Eu868 as i32,
        modem_preset: potatomesh_ingest::proto::ModemPreset::LongFast as i32,
        ..Default::default()
    });

    let packet = json!({
        "id": 600,
        "rxTime": 1_700_000_500i64,
        "fromId": "!abc",
        "toId": "^all",
        "decoded": {"portnum": "TEXT_MESSAGE_APP", "payload": {"text": "meta"}, "channel": 1},
    });
    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    assert_eq!(posts[0].1["lora_freq"], 868);
    assert_eq!(posts[0].1["modem_preset"], "LongFast");
}

#[tokio::test]
async fn node_upserts_carry_metadata_inside_each_entry() {
    let (state, sender) = recording_state();
    state.radio.capture(&potatomesh_ingest::proto::LoRaConfig {
        region: potatomesh_ingest::proto::RegionCode::Eu868 as i32,
        ..Default::default()
    });
    handlers::upsert_node(
        &state,
        "!00000001",
        &json!({"user": {"shortName": "one"}, "lastHeard": 5}),
    )
    .await;

    let posts = sender.posts.lock().await;
    let (path, body) = &posts[0];
    assert_eq!(path, "/api/nodes");
    assert_eq!(body["!00000001"]["lora_freq"], 868);
    assert_eq!(body["!00000001"]["lastHeard"], 5);
    assert!(body.get("lora_freq").is_none());
}
