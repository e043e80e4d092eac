//! Unified error types for the beacon core library.
//!
//! This module provides a unified error type [`BeaconError`] that covers all failure
//! modes across the presence bridge. The configuration module also has its own
//! [`ConfigError`](crate::config::ConfigError) for internal use, which converts into
//! [`BeaconError`].
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Context preservation**: Wrapped errors maintain their original context
//!
//! None of these errors is fatal to the scan cycle. The service logs them and
//! carries on; only startup code turns them into a process exit.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//!
//! fn require_prefix(prefix: &str) -> Result<()> {
//!     if prefix.is_empty() {
//!         return Err(BeaconError::ConfigValidationError("empty prefix".into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// Starting or stopping LE discovery failed.
    #[error("Bluetooth scan failed: {0}")]
    BluetoothScanFailed(String),

    // =========================================================================
    // BROKER ERRORS
    // =========================================================================
    /// The broker could not be reached or the client has shut down.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A single publish was rejected by the client.
    #[error("Failed to publish to '{topic}': {message}")]
    PublishFailed {
        /// Topic the publish was addressed to.
        topic: String,
        /// Reason reported by the client.
        message: String,
    },

    // =========================================================================
    // MESSAGE ERRORS
    // =========================================================================
    /// A retained presence message could not be decoded.
    #[error("Malformed presence message: {0}")]
    MalformedMessage(String),

    /// A presence message could not be encoded.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration sources could not be read or parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::BluetoothScanFailed(_)
        )
    }

    /// Returns `true` if this error came from the broker client.
    #[inline]
    #[must_use]
    pub const fn is_broker_error(&self) -> bool {
        matches!(self, Self::BrokerUnavailable(_) | Self::PublishFailed { .. })
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if the next scan cycle is likely to succeed without intervention.
    ///
    /// Broker hiccups and transient scan failures heal on their own; a missing
    /// adapter or a bad configuration does not.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BluetoothScanFailed(_)
                | Self::BrokerUnavailable(_)
                | Self::PublishFailed { .. }
                | Self::MalformedMessage(_)
        )
    }

    /// Returns a machine-readable error code for structured logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::BluetoothScanFailed(_) => "BLUETOOTH_SCAN_FAILED",
            Self::BrokerUnavailable(_) => "BROKER_UNAVAILABLE",
            Self::PublishFailed { .. } => "PUBLISH_FAILED",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<bluer::Error> for BeaconError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            bluer::ErrorKind::NotFound => Self::BluetoothAdapterNotFound,
            bluer::ErrorKind::NotReady => Self::BluetoothAdapterPoweredOff,
            _ => Self::BluetoothScanFailed(err.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
