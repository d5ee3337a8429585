//! # Supervisor Loop
//!
//! Owns the radio handle and the stop signal. Opens the interface (with
//! exponential backoff), captures session metadata, seeds the initial node
//! snapshot, announces heartbeats, and forces a reconnect on inactivity or
//! when the energy-saving duty cycle expires. Every wait is bounded by the
//! stop signal so shutdown is never blocked on a sleep.

use crate::error::IngestError;
use crate::handlers;
use crate::iface::{self, MeshInterface};
use crate::ingestor::Ingestor;
use crate::state::SharedState;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Trigger side of the process-wide stop signal.
#[derive(Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Sets the stop signal; idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the stop signal has already been set.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Wait side of the process-wide stop signal.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for up to `duration`, returning `true` when stopped.
    pub async fn wait_timeout(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let stopped = tokio::time::timeout(duration, async {
            while self.rx.changed().await.is_ok() {
                if *self.rx.borrow() {
                    return;
                }
            }
        })
        .await;
        stopped.is_ok() || self.is_triggered()
    }
}

/// Creates a connected stop handle/signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Opens mesh interfaces for the supervisor.
///
/// Injectable so tests can observe connection attempts and hand back
/// prepared interfaces instead of touching real transports.
#[async_trait]
pub trait InterfaceFactory: Send + Sync {
    async fn open(
        &self,
        target: Option<&str>,
    ) -> Result<(Box<dyn MeshInterface>, String), IngestError>;
}

/// Production factory delegating to the target parser and auto-discovery.
pub struct DefaultFactory;

#[async_trait]
impl InterfaceFactory for DefaultFactory {
    async fn open(
        &self,
        target: Option<&str>,
    ) -> Result<(Box<dyn MeshInterface>, String), IngestError> {
        match target {
            Some(target) => iface::create_interface(target).await,
            None => iface::create_default_interface().await,
        }
    }
}

/// Closes `iface` within the configured grace period.
///
/// A close that exceeds the timeout is abandoned with a warning; the
/// underlying task leaks rather than blocking shutdown.
async fn close_interface(iface: &dyn MeshInterface, close_timeout: Duration) {
    if close_timeout.is_zero() {
        iface.close().await;
        return;
    }
    if tokio::time::timeout(close_timeout, iface.close())
        .await
        .is_err()
    {
        warn!("Mesh interface close timed out after {close_timeout:?}");
    }
}

/// Spawns the receiver task draining the interface's packet stream.
fn spawn_receiver(state: Arc<SharedState>, iface: &mut Box<dyn MeshInterface>) {
    let Some(mut packets) = iface.take_packet_stream() else {
        return;
    };
    tokio::spawn(async move {
        while let Some(mut packet) = packets.recv().await {
            handlers::on_receive(&state, &mut packet).await;
        }
        debug!("Packet stream closed");
    });
}

/// Runs the mesh ingestion daemon until the stop signal fires.
///
/// Returns an error only when auto-discovery exhausts every candidate; the
/// operator must supply a target in that case.
pub async fn run(
    state: Arc<SharedState>,
    ingestor: Arc<Ingestor>,
    stop: StopSignal,
) -> Result<(), IngestError> {
    run_with_factory(state, ingestor, stop, Arc::new(DefaultFactory)).await
}

/// [`run`] with an injected interface factory.
pub async fn run_with_factory(
    state: Arc<SharedState>,
    ingestor: Arc<Ingestor>,
    mut stop: StopSignal,
    factory: Arc<dyn InterfaceFactory>,
) -> Result<(), IngestError> {
    let config = state.config.clone();
    let configured_target = config.connection.clone();
    let mut active_candidate = configured_target.clone();
    let mut iface: Option<Box<dyn MeshInterface>> = None;
    let mut retry_delay = config.reconnect_initial;
    let mut announced_target = false;
    let mut initial_snapshot_sent = false;
    let mut energy_session_deadline: Option<Instant> = None;
    let mut iface_connected_at: Option<Instant> = None;
    let mut last_seen_packet = state.last_packet();
    let mut last_inactivity_reconnect: Option<Instant> = None;
    let inactivity_window = config.inactivity_reconnect;

    info!(
        "Mesh daemon starting target={} port={} channel={}",
        if config.instance.is_empty() {
            "(no POTATOMESH_INSTANCE)"
        } else {
            config.instance.as_str()
        },
        active_candidate.as_deref().unwrap_or("auto"),
        config.channel_index,
    );

    while !stop.is_triggered() {
        if iface.is_none() {
            let opened = factory.open(active_candidate.as_deref()).await;
            match opened {
                Ok((mut new_iface, resolved_target)) => {
                    if active_candidate.is_none() {
                        active_candidate = Some(resolved_target.clone());
                    }

                    // Session metadata is captured before the first packet so
                    // the normalisers can read it lock-free.
                    if let Some(lora) = new_iface.lora_config() {
                        state.radio.capture(&lora);
                    }
                    let preset_fallback = state
                        .radio
                        .modem_preset()
                        .map(str::to_string)
                        .or_else(|| config.primary_channel_name.clone());
                    state
                        .channels
                        .capture(&new_iface.device_channels(), preset_fallback.as_deref());

                    let host_id = new_iface.my_node_id();
                    state.register_host_node_id(
                        host_id.as_deref().map(serde_json::Value::from).as_ref(),
                    );
                    ingestor.set_node_id(host_id.as_deref());
                    ingestor.queue_heartbeat(&state, false).await;

                    spawn_receiver(Arc::clone(&state), &mut new_iface);

                    retry_delay = config.reconnect_initial;
                    initial_snapshot_sent = false;
                    if !announced_target {
                        info!("Using mesh interface {resolved_target}");
                        announced_target = true;
                    }
                    energy_session_deadline = if config.energy_saving
                        && !config.energy_online.is_zero()
                    {
                        Some(Instant::now() + config.energy_online)
                    } else {
                        None
                    };
                    let now = Instant::now();
                    iface_connected_at = Some(now);
                    // Give a fresh connection a full inactivity window even
                    // when the receiver still reports an older packet time.
                    last_seen_packet = Some(now);
                    last_inactivity_reconnect = None;
                    iface = Some(new_iface);
                }
                Err(err @ IngestError::NoAvailableInterface(_)) => {
                    error!("No mesh interface available: {err}");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "Failed to create mesh interface candidate={} error={err}",
                        active_candidate.as_deref().unwrap_or("auto"),
                    );
                    if configured_target.is_none() {
                        active_candidate = None;
                        announced_target = false;
                    }
                    stop.wait_timeout(retry_delay).await;
                    if !config.reconnect_max.is_zero() {
                        let doubled = if retry_delay.is_zero() {
                            config.reconnect_initial
                        } else {
                            retry_delay * 2
                        };
                        retry_delay = doubled.min(config.reconnect_max);
                    }
                    continue;
                }
            }
        }

        if config.energy_saving {
            if let (Some(active), Some(deadline)) = (iface.as_deref(), energy_session_deadline) {
                if Instant::now() >= deadline {
                    info!("Energy saving disconnect");
                    close_interface(active, config.close_timeout).await;
                    iface = None;
                    announced_target = false;
                    initial_snapshot_sent = false;
                    energy_session_deadline = None;
                    if !config.energy_sleep.is_zero() {
                        debug!(
                            "energy saving: disconnected after session; sleeping for {:?}",
                            config.energy_sleep
                        );
                        stop.wait_timeout(config.energy_sleep).await;
                    }
                    continue;
                }
            }
        }

        if !initial_snapshot_sent {
            if let Some(active) = iface.as_deref() {
                let node_items = active.nodes_snapshot();
                let mut processed_snapshot_item = false;
                for (node_id, node) in &node_items {
                    processed_snapshot_item = true;
                    handlers::upsert_node(&state, node_id, node).await;
                }
                if processed_snapshot_item {
                    initial_snapshot_sent = true;
                }
            }
        }

        ingestor.queue_heartbeat(&state, false).await;

        if iface.is_some() && !inactivity_window.is_zero() {
            let now = Instant::now();
            let mut iface_activity = state.last_packet();
            if let (Some(activity), Some(connected_at)) = (iface_activity, iface_connected_at) {
                if activity < connected_at {
                    iface_activity = Some(connected_at);
                }
            }
            if let Some(activity) = iface_activity {
                if last_seen_packet.map(|seen| activity > seen).unwrap_or(true) {
                    last_seen_packet = Some(activity);
                    last_inactivity_reconnect = None;
                }
            }

            let latest_activity = iface_activity.or(iface_connected_at).unwrap_or(now);
            let inactivity_elapsed = now.duration_since(latest_activity);
            let believed_disconnected = iface
                .as_deref()
                .map(|active| !active.is_connected())
                .unwrap_or(false);
            let should_reconnect =
                believed_disconnected || inactivity_elapsed >= inactivity_window;

            // One reconnect per inactivity window at most.
            let reconnect_allowed = last_inactivity_reconnect
                .map(|last| now.duration_since(last) >= inactivity_window)
                .unwrap_or(true);

            if should_reconnect && reconnect_allowed {
                let reason = if believed_disconnected {
                    "disconnected".to_string()
                } else {
                    format!("no data for {}s", inactivity_elapsed.as_secs())
                };
                warn!("Mesh interface inactivity detected: {reason}");
                last_inactivity_reconnect = Some(now);
                if let Some(active) = iface.as_deref() {
                    close_interface(active, config.close_timeout).await;
                }
                iface = None;
                announced_target = false;
                initial_snapshot_sent = false;
                energy_session_deadline = None;
                iface_connected_at = None;
                continue;
            }
        }

        retry_delay = config.reconnect_initial;
        stop.wait_timeout(Duration::from_secs(config.snapshot_secs)).await;
    }

    if let Some(active) = iface.as_deref() {
        close_interface(active, config.close_timeout).await;
    }
    if state.queue.pending() > 0 {
        debug!("Exiting with {} queued posts pending", state.queue.pending());
    }
    Ok(())
}
