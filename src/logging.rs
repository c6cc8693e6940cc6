//! Optional `tracing` subscriber bootstrap.
//!
//! Nothing in the engine depends on a subscriber being installed; this is a
//! convenience for binaries and tests that want readable output, mirroring
//! the teacher crate's `tracing-subscriber` usage.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a default `fmt` subscriber driven by `RUST_LOG`, once per process.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    });
}
