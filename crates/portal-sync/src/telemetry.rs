//! Tracing setup for binaries and tests embedding the sync engine.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,portal_sync=debug,portal_db=debug,sqlx=warn";

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=portal_sync=trace` - Show store writes
/// - Default: INFO, with DEBUG for the portal crates
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    // a subscriber installed elsewhere wins
    let _ = try_init_tracing();
}

/// Like [`init_tracing`], reporting whether this call installed the subscriber.
pub fn try_init_tracing() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
