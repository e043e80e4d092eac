//! # beacon-core
//!
//! Core presence logic for the beacon presence bridge.
//!
//! This crate provides:
//! - iBeacon decoding from BLE manufacturer data
//! - Per-beacon presence records with a dual-threshold expiry policy
//! - A presence registry fed by detections and swept for expired beacons
//! - Publishing of presence transitions as retained broker messages
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`advertisement`] - Advertisement shapes and the iBeacon decoder
//! - [`beacon`] - The per-beacon record, bump and expiry rules
//! - [`registry`] - Address → record mapping, detection, sweep and bootstrap
//! - [`publisher`] - Topic layout and the broker collaborator trait
//! - [`message`] - The retained JSON presence message
//! - [`bluetooth`] - Scan feed trait, BlueZ scanner and mock scanner
//! - [`service`] - The scan/sweep cycle tying everything together
//! - [`clock`] - Time sources
//! - [`config`] - Layered configuration
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared value types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advertisement;
pub mod beacon;
pub mod bluetooth;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod publisher;
pub mod registry;
pub mod service;
pub mod types;

// Re-export primary types for convenience
pub use advertisement::{decode, Advertisement, IBeacon, PropertyValue, APPLE_COMPANY_ID};
pub use beacon::{BeaconRecord, BumpResult, PresencePolicy};
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluetoothScanner;
#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use bluetooth::MockScanner;
pub use bluetooth::{Detection, ScanFeed};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BrokerConfig, Config, ConfigError, LogRotation, LoggingConfig, PresenceConfig, RunEnvironment,
    ScannerConfig,
};
pub use error::{BeaconError, Result};
pub use message::PresenceMessage;
pub use publisher::{Broker, PresencePublisher, QoS};
pub use registry::{DetectionOutcome, PresenceRegistry};
pub use service::{CycleReport, PresenceService, ServiceOptions};
pub use types::{Presence, PresenceUpdate};
