//! # beacon-bridge
//!
//! Scans for iBeacon advertisements and publishes each tracked beacon's
//! presence as a retained MQTT message.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beacon-bridge -- ./config.toml
//!
//! # Production (on Raspberry Pi)
//! BEACON_ENV=production ./beacon-bridge /etc/beacon-bridge/config.toml
//! ```
//!
//! The config path is taken from the first argument, then `BEACON_CONFIG`,
//! then the platform default.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::Context;
use beacon_bridge::{app, logging};
use beacon_core::config::{default_config_path, Config};
use beacon_core::BeaconError;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("BEACON_CONFIG"))
        .map_or_else(default_config_path, PathBuf::from);

    let config = Config::load(&path)
        .map_err(BeaconError::from)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    logging::init(config.env, &config.logging)?;
    info!(config = %path.display(), env = ?config.env, "Starting beacon-bridge");

    app::run(config).await
}
