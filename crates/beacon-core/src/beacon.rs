//! Observed state of a single beacon.
//!
//! A [`BeaconRecord`] is created on the first detection of a hardware address,
//! bumped on every later detection, and dropped by the registry once
//! [`BeaconRecord::is_expired`] holds.
//!
//! Beacons broadcast slowly while stationary and switch to a fast rate while
//! moving. The fast ("triggered") mode is signalled by a proximity UUID ending
//! in `1`, and only a triggered beacon that has been known for a while is
//! judged against the short timeout. A vehicle that pulls up in motion and then
//! settles into slow broadcasts must not be expired by the fast threshold
//! before its first slow advertisement arrives.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::advertisement::{self, Advertisement};

/// Thresholds governing expiry and RSSI change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePolicy {
    /// Silence after which a triggered beacon is gone (once past the grace period).
    pub triggered_timeout: Duration,
    /// Silence after which any beacon is gone.
    pub idle_timeout: Duration,
    /// Time since first sighting before the triggered timeout may apply.
    pub triggered_grace: Duration,
    /// Smallest RSSI change, in dBm, reported by [`BeaconRecord::bump`].
    pub rssi_hysteresis: i32,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            triggered_timeout: Duration::seconds(15),
            idle_timeout: Duration::seconds(120),
            triggered_grace: Duration::seconds(60),
            rssi_hysteresis: 6,
        }
    }
}

/// What changed when a known beacon was detected again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BumpResult {
    /// The decoded proximity UUID differs from the stored one.
    pub identity_changed: bool,
    /// The RSSI moved by at least the hysteresis band.
    pub signal_changed: bool,
}

impl BumpResult {
    /// Whether the change is worth republishing.
    #[must_use]
    pub const fn is_significant(self) -> bool {
        self.identity_changed || self.signal_changed
    }
}

/// Observed state of one physical beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconRecord {
    address: String,
    name: String,
    rssi: i16,
    uuid: Option<String>,
    major: Option<u16>,
    minor: Option<u16>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl BeaconRecord {
    /// Record a first sighting.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        rssi: i16,
        advertisement: &Advertisement,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            address: address.into(),
            name: name.into(),
            rssi,
            uuid: None,
            major: None,
            minor: None,
            first_seen: now,
            last_seen: now,
        };
        record.apply_identity(advertisement);
        record
    }

    /// Rebuild a record from previously announced state.
    ///
    /// Both timestamps are set to `now` so the record gets a full expiry window
    /// instead of inheriting however long the process was down.
    #[must_use]
    pub fn restored(
        address: impl Into<String>,
        name: impl Into<String>,
        rssi: i16,
        uuid: Option<String>,
        major: Option<u16>,
        minor: Option<u16>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            rssi,
            uuid,
            major,
            minor,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Apply a repeat detection.
    ///
    /// The stored RSSI only moves when the hysteresis band is crossed, so it
    /// always equals the last value worth announcing and slow drift still
    /// registers once it accumulates.
    pub fn bump(
        &mut self,
        advertisement: &Advertisement,
        rssi: i16,
        now: DateTime<Utc>,
        policy: &PresencePolicy,
    ) -> BumpResult {
        self.last_seen = now.max(self.first_seen);

        let identity_changed = self.apply_identity(advertisement);

        let delta = (i32::from(rssi) - i32::from(self.rssi)).abs();
        let signal_changed = delta >= policy.rssi_hysteresis;
        if signal_changed {
            self.rssi = rssi;
        }

        BumpResult {
            identity_changed,
            signal_changed,
        }
    }

    /// Store decoded identity fields, returning whether the UUID changed.
    fn apply_identity(&mut self, advertisement: &Advertisement) -> bool {
        let Some(decoded) = advertisement::decode(advertisement) else {
            return false;
        };

        self.major = Some(decoded.major);
        self.minor = Some(decoded.minor);
        if self.uuid.as_deref() == Some(decoded.uuid.as_str()) {
            false
        } else {
            self.uuid = Some(decoded.uuid);
            true
        }
    }

    /// Hardware address; the registry key.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Advertised device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last announced RSSI in dBm.
    #[must_use]
    pub const fn rssi(&self) -> i16 {
        self.rssi
    }

    /// Proximity UUID, once decoded.
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// iBeacon major value.
    #[must_use]
    pub const fn major(&self) -> Option<u16> {
        self.major
    }

    /// iBeacon minor value.
    #[must_use]
    pub const fn minor(&self) -> Option<u16> {
        self.minor
    }

    /// When this record was created.
    #[must_use]
    pub const fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// When the beacon was last detected.
    #[must_use]
    pub const fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Whether the beacon is broadcasting in its fast (motion) mode.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.uuid
            .as_deref()
            .and_then(|uuid| uuid.chars().last())
            .is_some_and(|c| c.eq_ignore_ascii_case(&'1'))
    }

    /// Time since the last detection.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_seen
    }

    /// Whether the beacon should be considered gone.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, policy: &PresencePolicy) -> bool {
        let age = self.age(now);
        let fast_rule = self.is_triggered()
            && now - self.first_seen >= policy.triggered_grace
            && age > policy.triggered_timeout;
        fast_rule || age > policy.idle_timeout
    }
}

impl fmt::Display for BeaconRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: UUID={}, Major={}, Minor={}, RSSI={}, MAC={}",
            self.name,
            self.uuid.as_deref().unwrap_or("-"),
            self.major.map_or_else(|| "-".to_string(), |v| v.to_string()),
            self.minor.map_or_else(|| "-".to_string(), |v| v.to_string()),
            self.rssi,
            self.address,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID_SLOW: [u8; 16] = [
        0xE2, 0xC5, 0x6D, 0xB5, 0xDF, 0xFB, 0x48, 0xD2, 0xB0, 0x60, 0xD0, 0xF5, 0xA7, 0x10, 0x96,
        0xE0,
    ];

    fn frame(uuid: [u8; 16], major: u16, minor: u16) -> Advertisement {
        let mut payload = vec![0x02, 0x15];
        payload.extend_from_slice(&uuid);
        payload.extend_from_slice(&major.to_be_bytes());
        payload.extend_from_slice(&minor.to_be_bytes());
        payload.push(0xC5);
        Advertisement::apple(payload)
    }

    fn triggered_frame() -> Advertisement {
        let mut uuid = UUID_SLOW;
        uuid[15] = 0xE1;
        frame(uuid, 1, 2)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[test]
    fn test_new_record_decodes_identity() {
        let record = BeaconRecord::new("AA:BB", "VyroABC", -60, &frame(UUID_SLOW, 1, 2), t0());
        assert_eq!(record.uuid(), Some("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0"));
        assert_eq!(record.major(), Some(1));
        assert_eq!(record.minor(), Some(2));
        assert_eq!(record.first_seen(), record.last_seen());
        assert!(!record.is_triggered());
    }

    #[test]
    fn test_new_record_without_vendor_data() {
        let record = BeaconRecord::new("AA:BB", "VyroABC", -60, &Advertisement::empty(), t0());
        assert_eq!(record.uuid(), None);
        assert_eq!(record.major(), None);
        assert!(!record.is_triggered());
    }

    #[test]
    fn test_triggered_suffix() {
        let record = BeaconRecord::new("AA:BB", "VyroABC", -60, &triggered_frame(), t0());
        assert!(record.is_triggered());
        assert!(record.uuid().unwrap().ends_with("E1"));
    }

    #[test]
    fn test_bump_below_hysteresis_never_reports_signal_change() {
        let policy = PresencePolicy::default();
        for delta in -5..=5_i16 {
            let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &Advertisement::empty(), t0());
            let result = record.bump(&Advertisement::empty(), -60 + delta, t0() + secs(1), &policy);
            assert!(!result.signal_changed, "delta {delta} reported a change");
            assert_eq!(record.rssi(), -60);
        }
    }

    #[test]
    fn test_bump_at_or_above_hysteresis_always_reports_signal_change() {
        let policy = PresencePolicy::default();
        for delta in [-40, -7, -6, 6, 7, 40_i16] {
            let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &Advertisement::empty(), t0());
            let result = record.bump(&Advertisement::empty(), -60 + delta, t0() + secs(1), &policy);
            assert!(result.signal_changed, "delta {delta} was not reported");
            assert_eq!(record.rssi(), -60 + delta);
        }
    }

    #[test]
    fn test_slow_drift_eventually_crosses_band() {
        let policy = PresencePolicy::default();
        let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &Advertisement::empty(), t0());
        let adv = Advertisement::empty();

        assert!(!record.bump(&adv, -62, t0() + secs(1), &policy).signal_changed);
        assert!(!record.bump(&adv, -64, t0() + secs(2), &policy).signal_changed);
        assert!(record.bump(&adv, -66, t0() + secs(3), &policy).signal_changed);
    }

    #[test]
    fn test_bump_identity_change() {
        let policy = PresencePolicy::default();
        let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &Advertisement::empty(), t0());

        let first = record.bump(&frame(UUID_SLOW, 1, 2), -60, t0() + secs(1), &policy);
        assert!(first.identity_changed);

        let same = record.bump(&frame(UUID_SLOW, 1, 3), -60, t0() + secs(2), &policy);
        assert!(!same.identity_changed);
        assert_eq!(record.minor(), Some(3));

        let switched = record.bump(&triggered_frame(), -60, t0() + secs(3), &policy);
        assert!(switched.identity_changed);
        assert!(record.is_triggered());
    }

    #[test]
    fn test_bump_without_vendor_data_keeps_identity() {
        let policy = PresencePolicy::default();
        let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &frame(UUID_SLOW, 1, 2), t0());

        let result = record.bump(&Advertisement::empty(), -60, t0() + secs(5), &policy);

        assert!(!result.is_significant());
        assert_eq!(record.uuid(), Some("E2C56DB5-DFFB-48D2-B060-D0F5A71096E0"));
        assert_eq!(record.last_seen(), t0() + secs(5));
    }

    #[test]
    fn test_last_seen_never_precedes_first_seen() {
        let policy = PresencePolicy::default();
        let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &Advertisement::empty(), t0());
        record.bump(&Advertisement::empty(), -60, t0() - secs(30), &policy);
        assert!(record.last_seen() >= record.first_seen());
    }

    #[test]
    fn test_idle_record_expires_after_idle_timeout() {
        let policy = PresencePolicy::default();
        let record = BeaconRecord::new("AA:BB", "VyroABC", -60, &frame(UUID_SLOW, 1, 2), t0());

        assert!(!record.is_expired(t0() + secs(120), &policy));
        assert!(record.is_expired(t0() + secs(121), &policy));
    }

    #[test]
    fn test_triggered_record_past_grace_uses_short_timeout() {
        let policy = PresencePolicy::default();
        let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &triggered_frame(), t0());
        record.bump(&triggered_frame(), -60, t0() + secs(60), &policy);

        // first seen 80s ago, last seen 20s ago
        assert!(record.is_expired(t0() + secs(80), &policy));
    }

    #[test]
    fn test_triggered_record_within_grace_uses_idle_timeout() {
        let policy = PresencePolicy::default();
        let record = BeaconRecord::new("AA:BB", "VyroABC", -60, &triggered_frame(), t0());

        // first seen 20s ago, last seen 20s ago: fails the 60s gate
        assert!(!record.is_expired(t0() + secs(20), &policy));
        assert!(!record.is_expired(t0() + secs(59), &policy));
        assert!(record.is_expired(t0() + secs(121), &policy));
    }

    #[test]
    fn test_no_eviction_inside_short_timeout_regardless_of_mode() {
        let policy = PresencePolicy::default();
        for adv in [frame(UUID_SLOW, 1, 2), triggered_frame(), Advertisement::empty()] {
            let mut record = BeaconRecord::new("AA:BB", "VyroABC", -60, &adv, t0());
            for seen in [0, 10, 45, 59] {
                record.bump(&adv, -60, t0() + secs(seen), &policy);
                for age in 0..=15 {
                    assert!(!record.is_expired(t0() + secs(seen + age), &policy));
                }
            }
        }
    }

    #[test]
    fn test_restored_record_starts_fresh() {
        let now = t0() + secs(3600);
        let record = BeaconRecord::restored(
            "AA:BB",
            "VyroABC",
            -70,
            Some("E2C56DB5-DFFB-48D2-B060-D0F5A71096E1".into()),
            Some(1),
            Some(2),
            now,
        );
        assert_eq!(record.first_seen(), now);
        assert_eq!(record.last_seen(), now);
        assert!(record.is_triggered());
        assert!(!record.is_expired(now + secs(15), &PresencePolicy::default()));
    }

    #[test]
    fn test_display() {
        let record = BeaconRecord::new("AA:BB", "VyroABC", -60, &frame(UUID_SLOW, 1, 2), t0());
        let text = record.to_string();
        assert!(text.starts_with("VyroABC: UUID=E2C56DB5"));
        assert!(text.contains("MAC=AA:BB"));
    }
}
