//! Nodeinfo decoding scenarios, including the protobuf fallback paths.

mod common;

use base64::Engine;
use common::recording_state;
use potatomesh_ingest::handlers;
use potatomesh_ingest::proto;
use prost::Message;
use serde_json::json;

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[tokio::test]
async fn nodeinfo_payload_is_parsed_and_upserted() {
    let (state, sender) = recording_state();
    let info = proto::NodeInfo {
        num: 0xabcd1234,
        user: Some(proto::User {
            id: "!abcd1234".to_string(),
            long_name: "Kartoffel One".to_string(),
            short_name: "KA1".to_string(),
            role: proto::DeviceRole::Router as i32,
            ..Default::default()
        }),
        snr: 6.25,
        last_heard: 1_600_000_000,
        hops_away: Some(2),
        ..Default::default()
    };

    let packet = json!({
        "id": 700,
        "rxTime": 1_700_000_000i64,
        "fromId": "!abcd1234",
        "decoded": {
            "portnum": "NODEINFO_APP",
            "payload": b64(&info.encode_to_vec()),
        },
    });
    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    assert_eq!(posts.len(), 1);
    let (path, body) = &posts[0];
    assert_eq!(path, "/api/nodes");
    let node = &body["!abcd1234"];
    assert_eq!(node["num"], 0xabcd1234u32 as i64);
    assert_eq!(node["user"]["longName"], "Kartoffel One");
    assert_eq!(node["user"]["role"], "ROUTER");
    assert_eq!(node["snr"], 6.25);
    // last_heard older than rx_time is clamped forward.
    assert_eq!(node["lastHeard"], 1_700_000_000i64);
    assert_eq!(node["hopsAway"], 2);
}

#[tokio::test]
async fn bare_user_payload_is_wrapped_into_nodeinfo() {
    let (state, sender) = recording_state();
    let user = proto::User {
        id: "!00000007".to_string(),
        long_name: "Seven".to_string(),
        ..Default::default()
    };
    let packet = json!({
        "id": 701,
        "rxTime": 1_700_000_001i64,
        "decoded": {
            "portnum": "NODEINFO_APP",
            "payload": b64(&user.encode_to_vec()),
        },
    });
    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    let node = &posts[0].1["!00000007"];
    assert_eq!(node["user"]["longName"], "Seven");
    assert_eq!(node["num"], 7);
}

#[tokio::test]
async fn undecodable_payload_falls_back_to_the_decoded_view() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 702,
        "rxTime": 1_700_000_002i64,
        "fromId": "!0000002a",
        "decoded": {
            "portnum": "NODEINFO_APP",
            "user": {"id": "!0000002a", "shortName": "42", "role": 1},
            "deviceMetrics": {"batteryLevel": 55},
        },
    });
    handlers::store_packet(&state, &packet).await;

    let posts = sender.posts.lock().await;
    let node = &posts[0].1["!0000002a"];
    assert_eq!(node["user"]["shortName"], "42");
    assert_eq!(node["user"]["role"], "CLIENT_MUTE");
    assert_eq!(node["deviceMetrics"]["batteryLevel"], 55);
}

#[tokio::test]
async fn nodeinfo_without_any_identifier_is_dropped() {
    let (state, sender) = recording_state();
    let packet = json!({
        "id": 703,
        "rxTime": 1_700_000_003i64,
        "decoded": {"portnum": "NODEINFO_APP"},
    });
    handlers::store_packet(&state, &packet).await;
    assert!(sender.posts.lock().await.is_empty());
}
