use clap::Parser;
use potatomesh_ingest::{
    daemon, init_logger, stop_channel, IngestConfig, IngestError, Ingestor, PostQueue, SharedState,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mesh-ingestd")]
#[command(about = "Meshtastic packet ingestion daemon for PotatoMesh")]
#[command(version)]
struct Cli {
    /// Connection target: serial path, numeric IP[:port], BLE MAC, or "mock".
    /// Overrides the CONNECTION environment variable; omit to auto-discover.
    #[arg(short, long)]
    connection: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = IngestConfig::from_env()?;
    if cli.connection.is_some() {
        config.connection = cli.connection;
    }
    init_logger(config.debug);

    let queue = PostQueue::with_config(&config)?;
    let state = Arc::new(SharedState::new(config, queue));
    let ingestor = Arc::new(Ingestor::new());

    let (stop_handle, stop) = stop_channel();
    spawn_signal_listener(stop_handle);

    match daemon::run(state, ingestor, stop).await {
        Ok(()) => Ok(()),
        // The operator must supply a target when discovery exhausts every
        // candidate; exit distinctly so service managers notice.
        Err(IngestError::NoAvailableInterface(_)) => std::process::exit(1),
        Err(err) => Err(err.into()),
    }
}

/// Installs the stop-signal handlers.
///
/// The first SIGINT or SIGTERM sets the stop signal; a second SIGINT forces
/// the process down so hung shutdowns can be escaped.
fn spawn_signal_listener(stop_handle: potatomesh_ingest::StopHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                return;
            };
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            return;
                        }
                        if stop_handle.is_triggered() {
                            std::process::exit(130);
                        }
                        stop_handle.trigger();
                    }
                    _ = sigterm.recv() => {
                        stop_handle.trigger();
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if stop_handle.is_triggered() {
                    std::process::exit(130);
                }
                stop_handle.trigger();
            }
        }
    });
}
