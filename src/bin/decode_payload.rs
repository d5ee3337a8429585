//! Decode one Meshtastic protobuf payload from stdin JSON.
//!
//! Input: `{"portnum": <int>, "payload_b64": "<base64>"}`. Output: one JSON
//! object on stdout, either `{portnum, type, payload}` or `{error: "..."}`
//! with a non-zero exit status.

use potatomesh_ingest::decode::decode_payload;
use serde_json::{json, Value};
use std::io::Read;

fn run() -> i32 {
    let mut raw = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut raw) {
        print!("{}", json!({"error": format!("invalid-json: {err}")}));
        return 1;
    }

    let request: Value = match serde_json::from_str(&raw) {
        Ok(request) => request,
        Err(err) => {
            print!("{}", json!({"error": format!("invalid-json: {err}")}));
            return 1;
        }
    };

    let Some(portnum) = request.get("portnum").and_then(Value::as_i64) else {
        print!("{}", json!({"error": "missing-portnum"}));
        return 1;
    };
    let Some(payload_b64) = request.get("payload_b64").and_then(Value::as_str) else {
        print!("{}", json!({"error": "missing-payload"}));
        return 1;
    };

    let result = decode_payload(portnum, payload_b64);
    let failed = result.get("error").is_some();
    print!("{result}");
    if failed {
        1
    } else {
        0
    }
}

fn main() {
    std::process::exit(run());
}
