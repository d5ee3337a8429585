//! # potatomesh-ingest - Meshtastic Packet Ingestion for PotatoMesh
//!
//! A long-running daemon that connects to a Meshtastic LoRa radio over
//! serial, TCP or BLE target strings, normalises its decoded packet stream
//! into well-typed JSON records, and forwards them to a PotatoMesh dashboard
//! API. It is built to survive transient disconnects, radio silence and API
//! outages without losing its place or spamming upstream.
//!
//! ## Features
//!
//! - Interface discovery and lifecycle: serial/TCP target parsing, BLE
//!   address recognition, auto-discovery over the usual device paths, and a
//!   mock interface for tests
//! - A packet normalisation pipeline keyed by semantic portnum (TEXT,
//!   POSITION, NODEINFO, NEIGHBORINFO, TELEMETRY, TRACEROUTE)
//! - A priority HTTP dispatch queue that posts high-value records (messages)
//!   before bulk ones (node snapshots) while preserving per-priority order
//! - A supervisory loop with reconnect backoff, inactivity detection,
//!   optional energy-saving duty cycling, and an hourly ingestor heartbeat
//!
//! ## Usage
//!
//! The daemon is driven entirely by environment variables:
//!
//! ```sh
//! POTATOMESH_INSTANCE=https://map.example CONNECTION=/dev/ttyACM0 mesh-ingestd
//! ```
//!
//! The companion `decode_payload` binary decodes one protobuf payload from a
//! JSON request on stdin.

pub mod channels;
pub mod config;
pub mod daemon;
pub mod decode;
pub mod error;
pub mod handlers;
pub mod iface;
pub mod ingestor;
pub mod logging;
pub mod packet;
pub mod proto;
pub mod queue;
pub mod state;

pub use crate::config::IngestConfig;
pub use crate::daemon::{stop_channel, StopHandle, StopSignal};
pub use crate::error::IngestError;
pub use crate::iface::{
    create_default_interface, create_interface, MeshInterface, MockInterface, Target,
};
pub use crate::ingestor::Ingestor;
pub use crate::logging::init_logger;
pub use crate::queue::{PostQueue, PostSender};
pub use crate::state::SharedState;
