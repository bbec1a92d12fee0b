//! Logging initialization.
//!
//! Console subscriber with `RUST_LOG`-style filtering. Defaults keep the
//! noisy browser protocol crates at warn.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,chromiumoxide=warn,sqlx=warn,hyper=warn";

/// Initialize the global subscriber. Call once from the binary.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    Ok(())
}
