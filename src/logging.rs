//! Ambient structured logging, independent of the per-channel
//! [`crate::diagnostics::DiagnosticSink`]. Every transport and dispatch
//! decision emits a `tracing` event at an appropriate level; a caller who
//! wants console output installs a subscriber, typically via [`init`].

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` formatter honoring `RUST_LOG`, defaulting
/// to `info` when unset. Safe to call more than once; only the first call
/// takes effect.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
