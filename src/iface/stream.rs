//! Framed radio driver shared by the serial and TCP transports.
//!
//! The Meshtastic stream API wraps every `FromRadio` protobuf in a four-byte
//! header: `0x94 0xC3` followed by a big-endian payload length. On connect
//! the driver requests the config download with `want_config_id`, records the
//! local node number, channel table, LoRa config and node database as they
//! stream past, and then forwards decoded packets to the receiver channel.

use crate::error::IngestError;
use crate::iface::MeshInterface;
use crate::packet::convert;
use crate::packet::node_id::{candidate_node_id, canonical_node_id};
use crate::proto;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use log::{debug, warn};
use prost::Message;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};

const START1: u8 = 0x94;
const START2: u8 = 0xC3;

/// Upper bound on one framed payload; larger lengths indicate desync.
const MAX_FRAME_LEN: usize = 512;

/// How long to wait for the device's config download to finish.
const CONFIG_WAIT: Duration = Duration::from_secs(15);

#[derive(Default)]
struct DeviceState {
    nodes: HashMap<String, Value>,
    node_order: Vec<String>,
    my_node_num: Option<u32>,
    channels: Vec<proto::Channel>,
    lora: Option<proto::LoRaConfig>,
}

struct Shared {
    device: Mutex<DeviceState>,
    connected: AtomicBool,
    config_complete: AtomicBool,
    config_notify: Notify,
}

/// Driver for stream transports implementing [`MeshInterface`].
pub struct StreamInterface {
    shared: Arc<Shared>,
    packet_rx: Option<mpsc::Receiver<Value>>,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    read_task: tokio::task::JoinHandle<()>,
    label: String,
}

impl StreamInterface {
    /// Starts the driver on `stream` and waits for the config download.
    pub async fn start<S>(stream: S, label: String) -> Result<StreamInterface, IngestError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            device: Mutex::new(DeviceState::default()),
            connected: AtomicBool::new(true),
            config_complete: AtomicBool::new(false),
            config_notify: Notify::new(),
        });
        let (packet_tx, packet_rx) = mpsc::channel(256);

        // Nonce echoed back as config_complete_id.
        let config_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.subsec_nanos() | 1)
            .unwrap_or(1);
        let request = proto::ToRadio {
            payload_variant: Some(proto::to_radio::PayloadVariant::WantConfigId(config_id)),
        };
        writer
            .write_all(&frame_to_radio(&request))
            .await
            .map_err(|err| IngestError::FrameParseError(err.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|err| IngestError::FrameParseError(err.to_string()))?;

        let read_shared = Arc::clone(&shared);
        let read_label = label.clone();
        let read_task = tokio::spawn(async move {
            read_loop(reader, read_shared, packet_tx, read_label).await;
        });

        let iface = StreamInterface {
            shared,
            packet_rx: Some(packet_rx),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            read_task,
            label,
        };
        iface.wait_for_config().await;
        Ok(iface)
    }

    async fn wait_for_config(&self) {
        if self.shared.config_complete.load(Ordering::Acquire) {
            return;
        }
        let waited = tokio::time::timeout(CONFIG_WAIT, async {
            loop {
                if self.shared.config_complete.load(Ordering::Acquire) {
                    return;
                }
                self.shared.config_notify.notified().await;
            }
        })
        .await;
        if waited.is_err() {
            warn!(
                "Config download from {} did not finish within {:?}",
                self.label, CONFIG_WAIT
            );
        }
    }
}

#[async_trait]
impl MeshInterface for StreamInterface {
    fn nodes_snapshot(&self) -> Vec<(String, Value)> {
        let device = self.shared.device.lock().unwrap_or_else(|e| e.into_inner());
        device
            .node_order
            .iter()
            .filter_map(|id| device.nodes.get(id).map(|node| (id.clone(), node.clone())))
            .collect()
    }

    fn my_node_id(&self) -> Option<String> {
        let device = self.shared.device.lock().unwrap_or_else(|e| e.into_inner());
        device
            .my_node_num
            .map(|num| format!("!{num:08x}"))
    }

    fn device_channels(&self) -> Vec<proto::Channel> {
        self.shared
            .device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .channels
            .clone()
    }

    fn lora_config(&self) -> Option<proto::LoRaConfig> {
        self.shared
            .device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lora
            .clone()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn take_packet_stream(&mut self) -> Option<mpsc::Receiver<Value>> {
        self.packet_rx.take()
    }

    async fn close(&self) {
        self.shared.connected.store(false, Ordering::Release);
        let disconnect = proto::ToRadio {
            payload_variant: Some(proto::to_radio::PayloadVariant::Disconnect(true)),
        };
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_all(&frame_to_radio(&disconnect)).await {
            debug!("Error sending disconnect to {}: {err}", self.label);
        }
        let _ = writer.shutdown().await;
        self.read_task.abort();
    }
}

impl Drop for StreamInterface {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

/// Wraps an outbound message in the stream framing.
fn frame_to_radio(message: &proto::ToRadio) -> Vec<u8> {
    let body = message.encode_to_vec();
    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.push(START1);
    framed.push(START2);
    framed.extend_from_slice(&(body.len() as u16).to_be_bytes());
    framed.extend_from_slice(&body);
    framed
}

/// Extracts the next framed payload from `buffer`, discarding noise bytes.
fn next_frame(buffer: &mut BytesMut) -> Option<Vec<u8>> {
    loop {
        // Drop everything before a plausible frame header.
        while !buffer.is_empty() && buffer[0] != START1 {
            buffer.advance(1);
        }
        if buffer.len() < 4 {
            return None;
        }
        if buffer[1] != START2 {
            buffer.advance(1);
            continue;
        }
        let length = usize::from(u16::from_be_bytes([buffer[2], buffer[3]]));
        if length > MAX_FRAME_LEN {
            buffer.advance(1);
            continue;
        }
        if buffer.len() < 4 + length {
            return None;
        }
        buffer.advance(4);
        let payload = buffer.split_to(length);
        return Some(payload.to_vec());
    }
}

async fn read_loop<R>(
    mut reader: R,
    shared: Arc<Shared>,
    packet_tx: mpsc::Sender<Value>,
    label: String,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut buffer = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("Stream {label} reached EOF");
                break;
            }
            Ok(read) => {
                buffer.extend_from_slice(&chunk[..read]);
                while let Some(payload) = next_frame(&mut buffer) {
                    match proto::FromRadio::decode(payload.as_slice()) {
                        Ok(message) => {
                            handle_from_radio(&shared, &packet_tx, message).await;
                        }
                        Err(err) => {
                            debug!("Undecodable frame from {label}: {err}");
                        }
                    }
                }
            }
            Err(err) => {
                warn!("Read error on {label}: {err}");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Release);
    shared.config_notify.notify_waiters();
}

async fn handle_from_radio(
    shared: &Arc<Shared>,
    packet_tx: &mpsc::Sender<Value>,
    message: proto::FromRadio,
) {
    match message.payload_variant {
        Some(proto::from_radio::PayloadVariant::Packet(packet)) => {
            let value = convert::mesh_packet_to_value(&packet);
            if packet_tx.send(value).await.is_err() {
                debug!("Packet receiver dropped; discarding packet");
            }
        }
        Some(proto::from_radio::PayloadVariant::MyInfo(info)) => {
            let mut device = shared.device.lock().unwrap_or_else(|e| e.into_inner());
            device.my_node_num = Some(info.my_node_num);
        }
        Some(proto::from_radio::PayloadVariant::NodeInfo(info)) => {
            let node = convert::node_info_to_value(&info);
            if let Some((id, node)) = normalise_nodeinfo(node) {
                let mut device = shared.device.lock().unwrap_or_else(|e| e.into_inner());
                if !device.nodes.contains_key(&id) {
                    device.node_order.push(id.clone());
                }
                device.nodes.insert(id, node);
            }
        }
        Some(proto::from_radio::PayloadVariant::Config(config)) => {
            if let Some(proto::config::PayloadVariant::Lora(lora)) = config.payload_variant {
                let mut device = shared.device.lock().unwrap_or_else(|e| e.into_inner());
                device.lora = Some(lora);
            }
        }
        Some(proto::from_radio::PayloadVariant::Channel(channel)) => {
            let mut device = shared.device.lock().unwrap_or_else(|e| e.into_inner());
            device.channels.push(channel);
        }
        Some(proto::from_radio::PayloadVariant::ConfigCompleteId(_)) => {
            shared.config_complete.store(true, Ordering::Release);
            shared.config_notify.notify_waiters();
        }
        None => {}
    }
}

/// Guarantees a node entry carries a canonical `id` before it enters the map.
///
/// Firmware occasionally ships nodeinfo frames without a usable user id;
/// those get one synthesised from the nested sections or the node number,
/// and entries with no identifier at all are skipped instead of aborting the
/// reader.
pub fn normalise_nodeinfo(mut node: Value) -> Option<(String, Value)> {
    let id = node
        .as_object()
        .and_then(|map| {
            map.get("user")
                .and_then(|user| canonical_node_id(user.as_object()?.get("id")))
        })
        .or_else(|| candidate_node_id(&node))?;
    if let Value::Object(map) = &mut node {
        let matches = map
            .get("id")
            .and_then(Value::as_str)
            .map(|existing| existing == id)
            .unwrap_or(false);
        if !matches {
            map.insert("id".to_string(), Value::from(id.clone()));
        }
    }
    Some((id, node))
}
