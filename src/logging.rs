//! Logger bootstrap for the ingestor binaries.

use log::LevelFilter;

/// Initializes the logger with the `env_logger` crate.
///
/// `RUST_LOG` takes precedence when set; otherwise the default level is
/// `info`, lowered to `debug` when the `DEBUG=1` switch is active so the
/// daemon's packet tracing becomes visible without extra flags.
pub fn init_logger(debug: bool) {
    let default_level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level.as_str()),
    )
    .format_timestamp_millis()
    .try_init()
    .ok();
}
