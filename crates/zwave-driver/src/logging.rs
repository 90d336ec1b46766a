//! Tracing subscriber configuration.
//!
//! Level conventions:
//! - ERROR: unrecoverable failures (transport gone)
//! - WARN: recovered protocol errors (NAK, checksum mismatch, MAC resync)
//! - INFO: lifecycle events (driver ready, node added, interview stage)
//! - DEBUG: message dispatch and transaction transitions
//! - TRACE: wire-level bytes
//!
//! Security keys are never logged at any level.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with sensible defaults.
///
/// Log level can be controlled via the `RUST_LOG` environment variable,
/// falling back to the given level from the config.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Initialize with JSON output for containerized deployments.
pub fn init_json(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .init();
}

/// Initialize for tests; safe to call multiple times.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
