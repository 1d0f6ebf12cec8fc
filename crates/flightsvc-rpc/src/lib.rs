//! Shared setup for the flightsvc binaries.

use tracing_subscriber::EnvFilter;

/// Install the global compact subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level is INFO, or DEBUG with `debug`.
pub fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}
