//! # Ingestor Configuration
//!
//! Environment-driven configuration for the mesh ingestion daemon. Values are
//! read once at startup into an [`IngestConfig`] that is injected into the
//! supervisor and handlers, keeping the daemon testable without touching the
//! process environment.

use crate::error::IngestError;
use std::env;
use std::time::Duration;

/// Default interval, in seconds, between node snapshot ticks.
pub const DEFAULT_SNAPSHOT_SECS: u64 = 60;

/// Default LoRa channel index used when none is specified.
pub const DEFAULT_CHANNEL_INDEX: u32 = 0;

/// Initial reconnection delay applied after connection loss.
pub const DEFAULT_RECONNECT_INITIAL_SECS: f64 = 5.0;

/// Maximum reconnection backoff delay.
pub const DEFAULT_RECONNECT_MAX_SECS: f64 = 60.0;

/// Grace period for interface shutdown routines to complete.
pub const DEFAULT_CLOSE_TIMEOUT_SECS: f64 = 5.0;

/// Interval before forcing a reconnect when no packets are observed.
pub const DEFAULT_INACTIVITY_RECONNECT_SECS: f64 = 3600.0;

/// Duration to stay online before entering a low-power sleep cycle.
pub const DEFAULT_ENERGY_ONLINE_SECS: f64 = 300.0;

/// Sleep duration used when energy saving mode is active.
pub const DEFAULT_ENERGY_SLEEP_SECS: f64 = 21600.0;

/// Default interval between ingestor heartbeat announcements.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 3600;

/// Runtime configuration for the ingestion daemon.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Connection target for the mesh interface; `None` enables auto-discovery.
    pub connection: Option<String>,
    /// Index of the LoRa channel to select when connecting.
    pub channel_index: u32,
    /// Enables verbose logging and the ignored-packet capture file.
    pub debug: bool,
    /// Base URL of the dashboard instance; empty disables POSTs.
    pub instance: String,
    /// Bearer token sent with API requests when non-empty.
    pub api_token: String,
    /// Enables the duty-cycled energy saving mode.
    pub energy_saving: bool,
    /// Interval between supervisor ticks.
    pub snapshot_secs: u64,
    /// Initial reconnect backoff delay.
    pub reconnect_initial: Duration,
    /// Reconnect backoff cap.
    pub reconnect_max: Duration,
    /// Bounded wait for interface close.
    pub close_timeout: Duration,
    /// Inactivity window before a forced reconnect; zero disables.
    pub inactivity_reconnect: Duration,
    /// Online window per energy-saving session.
    pub energy_online: Duration,
    /// Sleep duration between energy-saving sessions.
    pub energy_sleep: Duration,
    /// Minimum interval between heartbeat announcements.
    pub heartbeat_secs: u64,
    /// Fallback name for the primary channel.
    pub primary_channel_name: Option<String>,
    /// Channel names hidden by downstream consumers.
    pub hidden_channels: Vec<String>,
    /// Channel-name allow list consulted by downstream consumers.
    pub allowed_channels: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            connection: None,
            channel_index: DEFAULT_CHANNEL_INDEX,
            debug: false,
            instance: String::new(),
            api_token: String::new(),
            energy_saving: false,
            snapshot_secs: DEFAULT_SNAPSHOT_SECS,
            reconnect_initial: Duration::from_secs_f64(DEFAULT_RECONNECT_INITIAL_SECS),
            reconnect_max: Duration::from_secs_f64(DEFAULT_RECONNECT_MAX_SECS),
            close_timeout: Duration::from_secs_f64(DEFAULT_CLOSE_TIMEOUT_SECS),
            inactivity_reconnect: Duration::from_secs_f64(DEFAULT_INACTIVITY_RECONNECT_SECS),
            energy_online: Duration::from_secs_f64(DEFAULT_ENERGY_ONLINE_SECS),
            energy_sleep: Duration::from_secs_f64(DEFAULT_ENERGY_SLEEP_SECS),
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            primary_channel_name: None,
            hidden_channels: Vec::new(),
            allowed_channels: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Builds the configuration from the process environment.
    ///
    /// The legacy `MESH_SERIAL` variable is still accepted as an alias for
    /// `CONNECTION`.
    pub fn from_env() -> Result<IngestConfig, IngestError> {
        let mut config = IngestConfig::default();

        config.connection = env::var("CONNECTION")
            .ok()
            .or_else(|| env::var("MESH_SERIAL").ok())
            .filter(|value| !value.trim().is_empty());
        config.channel_index = parse_env_u32("CHANNEL_INDEX", DEFAULT_CHANNEL_INDEX)?;
        config.debug = env_flag("DEBUG");
        config.instance = env::var("POTATOMESH_INSTANCE")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        config.api_token = env::var("API_TOKEN").unwrap_or_default();
        config.energy_saving = env_flag("ENERGY_SAVING");
        config.snapshot_secs = parse_env_u64("MESH_SNAPSHOT_SECS", DEFAULT_SNAPSHOT_SECS)?;
        config.reconnect_initial =
            parse_env_secs("MESH_RECONNECT_INITIAL", DEFAULT_RECONNECT_INITIAL_SECS)?;
        config.reconnect_max = parse_env_secs("MESH_RECONNECT_MAX", DEFAULT_RECONNECT_MAX_SECS)?;
        config.close_timeout = parse_env_secs("MESH_CLOSE_TIMEOUT", DEFAULT_CLOSE_TIMEOUT_SECS)?;
        config.inactivity_reconnect = parse_env_secs(
            "MESH_INACTIVITY_RECONNECT",
            DEFAULT_INACTIVITY_RECONNECT_SECS,
        )?;
        config.energy_online = parse_env_secs("MESH_ENERGY_ONLINE", DEFAULT_ENERGY_ONLINE_SECS)?;
        config.energy_sleep = parse_env_secs("MESH_ENERGY_SLEEP", DEFAULT_ENERGY_SLEEP_SECS)?;
        config.heartbeat_secs = parse_env_u64("MESH_INGESTOR_HEARTBEAT", DEFAULT_HEARTBEAT_SECS)?;
        config.primary_channel_name = env::var("CHANNEL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        config.hidden_channels = parse_name_list(&env::var("HIDDEN_CHANNELS").unwrap_or_default());
        config.allowed_channels =
            parse_name_list(&env::var("ALLOWED_CHANNELS").unwrap_or_default());

        Ok(config)
    }

    /// Returns `true` when the dashboard instance is configured.
    pub fn has_instance(&self) -> bool {
        !self.instance.is_empty()
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|value| value == "1").unwrap_or(false)
}

fn parse_env_u32(name: &'static str, default: u32) -> Result<u32, IngestError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| IngestError::InvalidConfig { name, value }),
        _ => Ok(default),
    }
}

fn parse_env_u64(name: &'static str, default: u64) -> Result<u64, IngestError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| IngestError::InvalidConfig { name, value }),
        _ => Ok(default),
    }
}

fn parse_env_secs(name: &'static str, default: f64) -> Result<Duration, IngestError> {
    let secs = match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<f64>()
            .map_err(|_| IngestError::InvalidConfig { name, value })?,
        _ => default,
    };
    Ok(Duration::from_secs_f64(secs.max(0.0)))
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
