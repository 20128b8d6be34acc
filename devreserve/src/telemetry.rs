//! Tracing subscriber initialization.
//!
//! Log verbosity is controlled via `RUST_LOG`, e.g.
//! `RUST_LOG=devreserve=debug,sqlx=warn`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the fmt subscriber with env-filter support.
pub fn init_telemetry() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
