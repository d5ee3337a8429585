//! # Mesh Interface Selection
//!
//! Parses user-supplied target strings into serial, TCP, BLE or mock
//! interfaces and performs auto-discovery when no target is configured.
//! The concrete drivers sit behind the [`MeshInterface`] trait so the
//! supervisor and tests can swap them freely.

pub mod serial;
pub mod stream;
pub mod tcp;

use crate::error::IngestError;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::net::IpAddr;
use tokio::sync::mpsc;

/// Default port of the Meshtastic TCP API.
pub const DEFAULT_TCP_PORT: u16 = 4403;

/// Final TCP fallback tried when auto-discovery exhausts serial candidates.
pub const DEFAULT_TCP_TARGET: &str = "http://127.0.0.1";

const DEFAULT_SERIAL_PATTERNS: &[&str] = &[
    "/dev/ttyACM*",
    "/dev/ttyUSB*",
    "/dev/tty.usbmodem*",
    "/dev/tty.usbserial*",
    "/dev/cu.usbmodem*",
    "/dev/cu.usbserial*",
];

/// Parsed connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// In-memory stub interface.
    Mock,
    /// BLE MAC address, uppercased.
    Ble(String),
    /// Numeric IP literal plus port.
    Tcp(IpAddr, u16),
    /// Serial device path.
    Serial(String),
}

impl Target {
    /// Classifies a user-supplied target string.
    ///
    /// Empty strings and the mock aliases select the stub; six hex octets
    /// select BLE; numeric IP literals (optionally with scheme or port)
    /// select TCP; anything else is treated as a serial device path.
    pub fn parse(raw: &str) -> Target {
        let value = raw.trim();
        if matches!(
            value.to_ascii_lowercase().as_str(),
            "" | "mock" | "none" | "null" | "disabled"
        ) {
            return Target::Mock;
        }
        if let Some(address) = parse_ble_target(value) {
            return Target::Ble(address);
        }
        if let Some((host, port)) = parse_network_target(value) {
            return Target::Tcp(host, port);
        }
        Target::Serial(value.to_string())
    }

    /// Human-readable resolved target label.
    pub fn label(&self) -> String {
        match self {
            Target::Mock => "mock".to_string(),
            Target::Ble(address) => address.clone(),
            Target::Tcp(host, port) => format!("tcp://{host}:{port}"),
            Target::Serial(path) => path.clone(),
        }
    }
}

/// Returns an uppercase BLE MAC address when `value` matches the format.
pub fn parse_ble_target(value: &str) -> Option<String> {
    let value = value.trim();
    let octets: Vec<&str> = value.split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    for octet in &octets {
        if octet.len() != 2 || !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
    }
    Some(value.to_ascii_uppercase())
}

/// Returns `(host, port)` when `value` is a numeric IP address string.
///
/// Only literal IPv4/IPv6 addresses are accepted (no DNS), optionally with a
/// `scheme://` prefix and/or `:port` suffix.
pub fn parse_network_target(value: &str) -> Option<(IpAddr, u16)> {
    let mut value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(index) = value.find("://") {
        value = &value[index + 3..];
    }
    if let Some(index) = value.find('/') {
        value = &value[..index];
    }
    if value.is_empty() {
        return None;
    }

    if let Ok(addr) = value.parse::<std::net::SocketAddr>() {
        return Some((addr.ip(), addr.port()));
    }
    if let Ok(host) = value.parse::<IpAddr>() {
        return Some((host, DEFAULT_TCP_PORT));
    }
    if value.matches(':').count() == 1 && !value.starts_with('[') {
        let (host, port_text) = value.split_once(':')?;
        let host = host.parse::<IpAddr>().ok()?;
        let port = if port_text.is_empty() {
            DEFAULT_TCP_PORT
        } else {
            port_text.parse::<u16>().ok()?
        };
        return Some((host, port));
    }
    None
}

/// Contract between the supervisor/receiver and a concrete radio driver.
#[async_trait]
pub trait MeshInterface: Send + Sync {
    /// Consistent snapshot of the node map as `(canonical_id, node)` pairs.
    fn nodes_snapshot(&self) -> Vec<(String, Value)>;

    /// Canonical identifier of the locally attached radio, once known.
    fn my_node_id(&self) -> Option<String>;

    /// Channel table reported by the device during the config download.
    fn device_channels(&self) -> Vec<crate::proto::Channel>;

    /// LoRa configuration reported by the device, when captured.
    fn lora_config(&self) -> Option<crate::proto::LoRaConfig>;

    /// Whether the driver still believes the link is up.
    fn is_connected(&self) -> bool;

    /// Hands out the decoded packet stream; yields `None` after the first call.
    fn take_packet_stream(&mut self) -> Option<mpsc::Receiver<Value>>;

    /// Shuts the driver down, releasing the transport.
    async fn close(&self);
}

/// In-memory replacement used for the `mock` target and in tests.
pub struct MockInterface {
    packet_tx: mpsc::Sender<Value>,
    packet_rx: Option<mpsc::Receiver<Value>>,
    nodes: Vec<(String, Value)>,
    my_node_id: Option<String>,
}

impl MockInterface {
    pub fn new() -> MockInterface {
        let (packet_tx, packet_rx) = mpsc::channel(64);
        MockInterface {
            packet_tx,
            packet_rx: Some(packet_rx),
            nodes: Vec::new(),
            my_node_id: None,
        }
    }

    /// Seeds the node map, used by tests and demos.
    pub fn with_nodes(mut self, nodes: Vec<(String, Value)>) -> MockInterface {
        self.nodes = nodes;
        self
    }

    /// Sets the host identity, used by tests.
    pub fn with_my_node_id(mut self, id: &str) -> MockInterface {
        self.my_node_id = Some(id.to_string());
        self
    }

    /// Returns a sender that injects packets into the stream.
    pub fn packet_sender(&self) -> mpsc::Sender<Value> {
        self.packet_tx.clone()
    }
}

impl Default for MockInterface {
    fn default() -> Self {
        MockInterface::new()
    }
}

#[async_trait]
impl MeshInterface for MockInterface {
    fn nodes_snapshot(&self) -> Vec<(String, Value)> {
        self.nodes.clone()
    }

    fn my_node_id(&self) -> Option<String> {
        self.my_node_id.clone()
    }

    fn device_channels(&self) -> Vec<crate::proto::Channel> {
        Vec::new()
    }

    fn lora_config(&self) -> Option<crate::proto::LoRaConfig> {
        None
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn take_packet_stream(&mut self) -> Option<mpsc::Receiver<Value>> {
        self.packet_rx.take()
    }

    async fn close(&self) {}
}

/// Opens the interface described by `target`.
pub async fn create_interface(
    target: &str,
) -> Result<(Box<dyn MeshInterface>, String), IngestError> {
    match Target::parse(target) {
        Target::Mock => {
            debug!("Using dummy mesh interface");
            Ok((Box::new(MockInterface::new()), "mock".to_string()))
        }
        Target::Ble(address) => {
            debug!("BLE interface requested for {address}");
            Err(IngestError::BleUnavailable)
        }
        Target::Tcp(host, port) => {
            debug!("Using TCP interface host={host} port={port}");
            let iface = tcp::open_tcp(host, port).await?;
            Ok((iface, format!("tcp://{host}:{port}")))
        }
        Target::Serial(path) => {
            debug!("Using serial interface port={path}");
            let iface = serial::open_serial(&path).await?;
            Ok((iface, path))
        }
    }
}

/// Candidate serial device paths for auto-discovery.
///
/// Glob patterns are expanded, sorted and deduplicated; `/dev/ttyACM0` is
/// always appended as a last resort.
pub fn default_serial_targets() -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for pattern in DEFAULT_SERIAL_PATTERNS {
        for path in glob_paths(pattern) {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
    }
    if !candidates.iter().any(|path| path == "/dev/ttyACM0") {
        candidates.push("/dev/ttyACM0".to_string());
    }
    candidates
}

fn glob_paths(pattern: &str) -> Vec<String> {
    let Some((prefix, _)) = pattern.split_once('*') else {
        return vec![pattern.to_string()];
    };
    let (dir, name_prefix) = match prefix.rfind('/') {
        Some(index) => (&prefix[..index], &prefix[index + 1..]),
        None => return Vec::new(),
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(name_prefix))
        .map(|name| format!("{dir}/{name}"))
        .collect();
    paths.sort();
    paths
}

/// Attempts to create the default mesh interface, trying every candidate.
///
/// Serial candidates are tried in order, then the local TCP fallback. All
/// per-candidate errors are aggregated into the final failure.
pub async fn create_default_interface(
) -> Result<(Box<dyn MeshInterface>, String), IngestError> {
    let mut errors: Vec<(String, IngestError)> = Vec::new();
    for candidate in default_serial_targets() {
        match create_interface(&candidate).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                debug!("Failed to open serial candidate {candidate}: {err}");
                errors.push((candidate, err));
            }
        }
    }
    match create_interface(DEFAULT_TCP_TARGET).await {
        Ok(result) => {
            info!("Falling back to local TCP interface");
            Ok(result)
        }
        Err(err) => {
            debug!("Failed to open TCP fallback {DEFAULT_TCP_TARGET}: {err}");
            errors.push((DEFAULT_TCP_TARGET.to_string(), err));
            let summary = errors
                .iter()
                .map(|(target, error)| format!("{target}: {error}"))
                .collect::<Vec<_>>()
                .join("; ");
            Err(IngestError::NoAvailableInterface(summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_aliases_select_the_stub() {
        for raw in ["", "mock", "None", "NULL", "disabled", "  "] {
            assert_eq!(Target::parse(raw), Target::Mock, "{raw:?}");
        }
    }

    #[test]
    fn ble_addresses_are_uppercased() {
        assert_eq!(
            Target::parse("aa:bb:cc:dd:ee:0f"),
            Target::Ble("AA:BB:CC:DD:EE:0F".to_string())
        );
        assert_eq!(parse_ble_target("aa:bb:cc:dd:ee"), None);
        assert_eq!(parse_ble_target("zz:bb:cc:dd:ee:ff"), None);
    }

    #[test]
    fn network_targets_require_numeric_hosts() {
        assert_eq!(
            parse_network_target("192.168.1.10"),
            Some(("192.168.1.10".parse().unwrap(), DEFAULT_TCP_PORT))
        );
        assert_eq!(
            parse_network_target("http://127.0.0.1"),
            Some(("127.0.0.1".parse().unwrap(), DEFAULT_TCP_PORT))
        );
        assert_eq!(
            parse_network_target("tcp://10.0.0.2:4404"),
            Some(("10.0.0.2".parse().unwrap(), 4404))
        );
        assert_eq!(
            parse_network_target("::1"),
            Some(("::1".parse().unwrap(), DEFAULT_TCP_PORT))
        );
        assert_eq!(
            parse_network_target("[::1]:4500"),
            Some(("::1".parse().unwrap(), 4500))
        );
        // Hostnames are not resolved.
        assert_eq!(parse_network_target("meshtastic.local"), None);
    }

    #[test]
    fn serial_paths_fall_through() {
        assert_eq!(
            Target::parse("/dev/ttyACM0"),
            Target::Serial("/dev/ttyACM0".to_string())
        );
    }

    #[test]
    fn default_targets_always_include_ttyacm0() {
        let targets = default_serial_targets();
        assert!(targets.iter().any(|path| path == "/dev/ttyACM0"));
    }

    #[tokio::test]
    async fn mock_interface_hands_out_the_stream_once() {
        let mut iface = MockInterface::new();
        assert!(iface.take_packet_stream().is_some());
        assert!(iface.take_packet_stream().is_none());
        assert!(iface.is_connected());
        assert!(iface.nodes_snapshot().is_empty());
    }
}
