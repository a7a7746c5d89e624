use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging for the application.
///
/// `RUST_LOG` wins when set; otherwise the level is `debug` when requested
/// (`--debug` or `DEBUG_LOG=1`) and `info` by default.
///
/// This must be called once at startup (in main.rs).
pub fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    debug!("Logging initialized (default level: {})", default_level);
}
