//! Subscriber setup for the crate's `tracing` events.
//!
//! The engine only emits events; installing a subscriber is left to the
//! embedding program. [`init`] is a convenience for programs without one.

use crate::config::FfiConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding `EnvFilter` directives.
pub const LOG_ENV: &str = "DYNFFI_LOG";

/// Install a global `fmt` subscriber. Directives come from `DYNFFI_LOG`,
/// falling back to `config.log_filter`. Returns false when a global
/// subscriber was already installed.
pub fn init(config: &FfiConfig) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .is_ok()
}
