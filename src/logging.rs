//! Logging setup
//!
//! Installs a `tracing` subscriber for hosts that do not bring their own.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "tiered_cache=info";

/// Initializes the global tracing subscriber with an env filter.
///
/// Defaults to [`DEFAULT_FILTER`], can be overridden with the `RUST_LOG`
/// env var. Returns false when a global subscriber was already installed,
/// so calling it from several tests is harmless.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
