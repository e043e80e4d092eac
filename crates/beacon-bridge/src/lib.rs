//! # beacon-bridge
//!
//! Runtime pieces of the beacon presence bridge: the MQTT client, logging
//! setup and the process wiring that ties them to `beacon-core`.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod app;
pub mod logging;
pub mod mqtt;
