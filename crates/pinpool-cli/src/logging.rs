//! Logging setup for the CLI

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a given `-v` count
fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,pinpool_connection=info,pinpool_driver_sqlite=info,pinpool=info",
        2 => "info,pinpool_connection=debug,pinpool_driver_sqlite=debug,pinpool=debug",
        _ => "debug,pinpool_connection=trace,pinpool_driver_sqlite=trace,pinpool=trace",
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `-v`.
///
/// Logs go to stderr so query output on stdout stays pipeable.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}
