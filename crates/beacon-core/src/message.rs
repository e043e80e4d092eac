//! Retained presence message, the JSON document published per beacon topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::beacon::BeaconRecord;
use crate::clock::fractional_seconds;
use crate::error::{BeaconError, Result};

/// Presence state of one beacon as carried on the wire.
///
/// ```json
/// { "name": "VyroABC", "uuid": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
///   "major": 1, "minor": 2, "rssi": -60, "address": "AA:BB:CC:DD:EE:FF",
///   "presence": true, "triggered": false, "updated": 1700000000.25 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMessage {
    /// Advertised device name.
    pub name: String,
    /// Proximity UUID, if one was ever decoded.
    #[serde(default)]
    pub uuid: Option<String>,
    /// iBeacon major value.
    #[serde(default)]
    pub major: Option<u16>,
    /// iBeacon minor value.
    #[serde(default)]
    pub minor: Option<u16>,
    /// Last announced RSSI in dBm.
    pub rssi: i16,
    /// Hardware address.
    pub address: String,
    /// Whether the beacon is currently present.
    pub presence: bool,
    /// Whether the beacon was in its fast (motion) mode.
    #[serde(default)]
    pub triggered: bool,
    /// Last detection time, seconds since the Unix epoch.
    #[serde(default)]
    pub updated: f64,
}

impl PresenceMessage {
    /// Snapshot a record.
    #[must_use]
    pub fn from_record(record: &BeaconRecord, presence: bool) -> Self {
        Self {
            name: record.name().to_string(),
            uuid: record.uuid().map(str::to_string),
            major: record.major(),
            minor: record.minor(),
            rssi: record.rssi(),
            address: record.address().to_string(),
            presence,
            triggered: record.is_triggered(),
            updated: epoch_seconds(record.last_seen()),
        }
    }

    /// Rebuild a record from this message, treating `now` as the last sighting.
    #[must_use]
    pub fn into_record(self, now: DateTime<Utc>) -> BeaconRecord {
        BeaconRecord::restored(
            self.address,
            self.name,
            self.rssi,
            self.uuid,
            self.major,
            self.minor,
            now,
        )
    }

    /// Parse a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::MalformedMessage`] for invalid JSON or missing fields.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| BeaconError::MalformedMessage(e.to_string()))
    }

    /// Serialize to a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::SerializationError`] if encoding fails.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    fractional_seconds(at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::Advertisement;

    fn record() -> BeaconRecord {
        let mut payload = vec![0x02, 0x15];
        payload.extend_from_slice(&[0x11; 15]);
        payload.push(0x31);
        payload.extend_from_slice(&[0x00, 0x07, 0x00, 0x09, 0xC5]);
        BeaconRecord::new(
            "AA:BB:CC:DD:EE:FF",
            "VyroABC",
            -60,
            &Advertisement::apple(payload),
            DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap(),
        )
    }

    #[test]
    fn test_from_record_fields() {
        let message = PresenceMessage::from_record(&record(), true);
        assert_eq!(message.name, "VyroABC");
        assert_eq!(message.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(message.major, Some(7));
        assert_eq!(message.minor, Some(9));
        assert!(message.presence);
        assert!(message.triggered);
        assert!((message.updated - 1_700_000_000.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value =
            serde_json::from_slice(&PresenceMessage::from_record(&record(), false).to_vec().unwrap())
                .unwrap();

        for key in [
            "name", "uuid", "major", "minor", "rssi", "address", "presence", "triggered", "updated",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(json["presence"], false);
        assert_eq!(json["rssi"], -60);
    }

    #[test]
    fn test_null_identity_fields() {
        let payload = br#"{"name":"VyroXYZ","uuid":null,"major":null,"minor":null,
            "rssi":-80,"address":"11:22","presence":true,"triggered":false,"updated":1.0}"#;
        let message = PresenceMessage::from_slice(payload).unwrap();
        assert_eq!(message.uuid, None);
        assert_eq!(message.major, None);
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let payload = br#"{"name":"VyroXYZ","rssi":-80,"presence":true}"#;
        let err = PresenceMessage::from_slice(payload).unwrap_err();
        assert!(matches!(err, BeaconError::MalformedMessage(_)));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(PresenceMessage::from_slice(b"not json").is_err());
        assert!(PresenceMessage::from_slice(b"").is_err());
    }

    #[test]
    fn test_into_record_resets_timestamps() {
        let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        let restored = PresenceMessage::from_record(&record(), true).into_record(now);
        assert_eq!(restored.last_seen(), now);
        assert_eq!(restored.first_seen(), now);
        assert_eq!(restored.address(), "AA:BB:CC:DD:EE:FF");
        assert!(restored.is_triggered());
    }
}
