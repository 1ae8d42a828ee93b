//! Tracing setup helpers for hosts and tests.
//!
//! The engine itself only emits `tracing` events; installing a subscriber
//! is the embedding application's call. [`init`] wires up a reasonable
//! default for binaries and examples: compact fmt output on stderr,
//! filtered by `RUST_LOG` (falling back to `warn,filament=info`).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the default subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn,filament=info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let fmt_layer = fmt::layer().compact().with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
