//! # Shared Daemon State
//!
//! The queue, channel table, radio metadata, host identity and heartbeat
//! clock are process-wide in spirit but structured as one explicit state
//! object injected into the supervisor and the packet receiver, so test runs
//! can reset everything by constructing a fresh instance.

use crate::channels::{ChannelTable, RadioMeta};
use crate::config::IngestConfig;
use crate::packet::node_id::canonical_node_id;
use crate::queue::PostQueue;
use chrono::{SecondsFormat, Utc};
use log::{debug, warn};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::time::Instant;

/// Minimum interval between accepted host telemetry packets.
pub const HOST_TELEMETRY_INTERVAL_SECS: i64 = 60 * 60;

/// Shared state for one daemon process.
pub struct SharedState {
    pub config: IngestConfig,
    pub queue: PostQueue,
    pub channels: ChannelTable,
    pub radio: RadioMeta,
    host_node_id: Mutex<Option<String>>,
    host_telemetry_last_rx: Mutex<Option<i64>>,
    last_packet: Mutex<Option<Instant>>,
    ignored_log: IgnoredLog,
}

impl SharedState {
    pub fn new(config: IngestConfig, queue: PostQueue) -> SharedState {
        let ignored_log = IgnoredLog::new(config.debug, PathBuf::from("ignored.txt"));
        SharedState {
            config,
            queue,
            channels: ChannelTable::new(),
            radio: RadioMeta::new(),
            host_node_id: Mutex::new(None),
            host_telemetry_last_rx: Mutex::new(None),
            last_packet: Mutex::new(None),
            ignored_log,
        }
    }

    /// Redirects the ignored-packet log, used by tests.
    pub fn with_ignored_log_path(mut self, path: PathBuf) -> SharedState {
        self.ignored_log.path = path;
        self
    }

    /// Records the canonical identifier for the connected host device.
    ///
    /// Clears the host telemetry window so a fresh session accepts the first
    /// report immediately.
    pub fn register_host_node_id(&self, node_id: Option<&Value>) {
        let canonical = canonical_node_id(node_id);
        *self.host_node_id.lock().unwrap_or_else(|e| e.into_inner()) = canonical.clone();
        *self
            .host_telemetry_last_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        if let Some(id) = canonical {
            debug!("Registered host device node id {id}");
        }
    }

    /// Returns the canonical identifier for the connected host device.
    pub fn host_node_id(&self) -> Option<String> {
        self.host_node_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Checks the host telemetry window, accepting `rx_time` when open.
    ///
    /// Returns `None` when the packet is accepted (and marks the window) or
    /// `Some(minutes_remaining)` when it must be suppressed. Suppressed
    /// packets do not move the window.
    pub fn accept_host_telemetry(&self, rx_time: i64) -> Option<i64> {
        let mut last = self
            .host_telemetry_last_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(last_rx) = *last {
            let remaining = (last_rx + HOST_TELEMETRY_INTERVAL_SECS) - rx_time;
            if remaining > 0 {
                return Some((remaining + 59) / 60);
            }
        }
        *last = Some(rx_time);
        None
    }

    /// Records that a packet has been processed, for inactivity tracking.
    pub fn mark_packet_seen(&self) {
        *self.last_packet.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// Returns the instant of the most recently processed packet.
    pub fn last_packet(&self) -> Option<Instant> {
        *self.last_packet.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends one entry to the ignored-packet capture file in debug mode.
    pub fn record_ignored(&self, packet: &Value, reason: &str) {
        self.ignored_log.record(packet, reason);
    }
}

/// Append-only, line-delimited JSON capture of dropped packets.
struct IgnoredLog {
    enabled: bool,
    path: PathBuf,
    lock: Mutex<()>,
}

impl IgnoredLog {
    fn new(enabled: bool, path: PathBuf) -> IgnoredLog {
        IgnoredLog {
            enabled,
            path,
            lock: Mutex::new(()),
        }
    }

    fn record(&self, packet: &Value, reason: &str) {
        if !self.enabled {
            return;
        }
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "reason": reason,
            "packet": packet,
        });
        let line = entry.to_string();
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            warn!("failed to append ignored packet entry: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{PostQueue, PostSender};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullSender;

    #[async_trait]
    impl PostSender for NullSender {
        async fn send(&self, _path: &str, _body: &Value) {}
    }

    fn state(debug: bool) -> SharedState {
        let config = IngestConfig {
            debug,
            ..Default::default()
        };
        SharedState::new(config, PostQueue::new(Arc::new(NullSender)))
    }

    #[test]
    fn host_registration_resets_telemetry_window() {
        let state = state(false);
        state.register_host_node_id(Some(&json!("!abcd1234")));
        assert_eq!(state.host_node_id(), Some("!abcd1234".to_string()));

        assert_eq!(state.accept_host_telemetry(100), None);
        assert_eq!(state.accept_host_telemetry(200), Some(58));
        // Re-registering opens the window again.
        state.register_host_node_id(Some(&json!("!abcd1234")));
        assert_eq!(state.accept_host_telemetry(200), None);
    }

    #[test]
    fn host_telemetry_window_spans_an_hour() {
        let state = state(false);
        assert_eq!(state.accept_host_telemetry(100), None);
        assert!(state.accept_host_telemetry(200).is_some());
        assert_eq!(state.accept_host_telemetry(3800), None);
    }

    #[test]
    fn ignored_log_only_written_in_debug() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ignored.txt");

        let silent = state(false).with_ignored_log_path(path.clone());
        silent.record_ignored(&json!({"id": 1}), "unsupported-port");
        assert!(!path.exists());

        let verbose = state(true).with_ignored_log_path(path.clone());
        verbose.record_ignored(&json!({"id": 1}), "unsupported-port");
        let contents = std::fs::read_to_string(&path).unwrap();
        let entry: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(entry["reason"], "unsupported-port");
        assert_eq!(entry["packet"]["id"], 1);
    }
}
