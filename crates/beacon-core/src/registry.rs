//! The live mapping of tracked beacon addresses to their records.
//!
//! The registry is plain owned data: every operation is synchronous and
//! returns owned snapshots. Whoever owns it (the [`PresenceService`]) is the
//! single point through which detections and sweeps are serialized.
//!
//! [`PresenceService`]: crate::service::PresenceService

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::advertisement::Advertisement;
use crate::beacon::{BeaconRecord, BumpResult, PresencePolicy};
use crate::bluetooth::Detection;
use crate::clock::{fractional_seconds, Clock, SystemClock};
use crate::message::PresenceMessage;
use crate::types::PresenceUpdate;

/// Result of applying one detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// The device is not one we track.
    Ignored,
    /// First sighting of this address.
    New(BeaconRecord),
    /// Known beacon whose identity or signal changed enough to announce.
    Changed {
        /// Snapshot after the bump.
        record: BeaconRecord,
        /// What changed.
        change: BumpResult,
    },
    /// Known beacon, nothing worth announcing.
    Unchanged,
}

impl DetectionOutcome {
    /// Whether this outcome should be published as present.
    #[must_use]
    pub const fn should_publish(&self) -> bool {
        matches!(self, Self::New(_) | Self::Changed { .. })
    }

    /// The presence announcement for this outcome, if any.
    #[must_use]
    pub fn into_update(self) -> Option<PresenceUpdate> {
        match self {
            Self::New(record) | Self::Changed { record, .. } => Some(PresenceUpdate::present(record)),
            Self::Ignored | Self::Unchanged => None,
        }
    }
}

/// Tracked beacons keyed by hardware address.
#[derive(Debug)]
pub struct PresenceRegistry<C = SystemClock> {
    beacons: HashMap<String, BeaconRecord>,
    name_prefix: String,
    policy: PresencePolicy,
    clock: C,
}

impl PresenceRegistry<SystemClock> {
    /// Create a registry on the system clock.
    #[must_use]
    pub fn new(name_prefix: impl Into<String>, policy: PresencePolicy) -> Self {
        Self::with_clock(name_prefix, policy, SystemClock)
    }
}

impl<C: Clock> PresenceRegistry<C> {
    /// Create a registry on an explicit clock.
    #[must_use]
    pub fn with_clock(name_prefix: impl Into<String>, policy: PresencePolicy, clock: C) -> Self {
        Self {
            beacons: HashMap::new(),
            name_prefix: name_prefix.into(),
            policy,
            clock,
        }
    }

    /// Device-name prefix that selects tracked beacons.
    #[must_use]
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Thresholds in effect.
    #[must_use]
    pub const fn policy(&self) -> &PresencePolicy {
        &self.policy
    }

    /// Number of tracked beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Whether no beacons are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Look up a beacon by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&BeaconRecord> {
        self.beacons.get(address)
    }

    /// Iterate over tracked beacons in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &BeaconRecord> {
        self.beacons.values()
    }

    /// Apply a [`Detection`] from the scan feed.
    pub fn apply(&mut self, detection: &Detection) -> DetectionOutcome {
        self.apply_detection(
            &detection.address,
            detection.name.as_deref(),
            detection.rssi,
            &detection.advertisement,
        )
    }

    /// Create or bump the record for `address`.
    ///
    /// Devices without a name, or whose name does not start with the
    /// configured prefix, are ignored.
    pub fn apply_detection(
        &mut self,
        address: &str,
        name: Option<&str>,
        rssi: i16,
        advertisement: &Advertisement,
    ) -> DetectionOutcome {
        let Some(name) = name.filter(|n| n.starts_with(&self.name_prefix)) else {
            return DetectionOutcome::Ignored;
        };
        let now = self.clock.now();

        if let Some(record) = self.beacons.get_mut(address) {
            let change = record.bump(advertisement, rssi, now, &self.policy);
            let triggered = if record.is_triggered() { " TRIGGERED" } else { "" };

            if change.identity_changed {
                info!(address, "Redetected beacon {name}{triggered} with new UUID={}", record.uuid().unwrap_or("-"));
            } else if change.signal_changed {
                info!(address, "Redetected beacon {name}{triggered} with new RSSI={rssi}");
            } else {
                debug!(address, "Redetected beacon {name}{triggered}");
                return DetectionOutcome::Unchanged;
            }

            return DetectionOutcome::Changed {
                record: record.clone(),
                change,
            };
        }

        let record = BeaconRecord::new(address, name, rssi, advertisement, now);
        let triggered = if record.is_triggered() { " TRIGGERED" } else { "" };
        info!(address, "Detected new beacon {name}{triggered} with RSSI={rssi}");

        self.beacons.insert(address.to_string(), record.clone());
        DetectionOutcome::New(record)
    }

    /// Remove and return every expired record.
    pub fn sweep_expired(&mut self) -> Vec<(String, BeaconRecord)> {
        let now = self.clock.now();

        let expired: Vec<String> = self
            .beacons
            .iter()
            .filter_map(|(address, record)| {
                let age = fractional_seconds(record.age(now).num_milliseconds());
                let triggered = if record.is_triggered() { " TRIGGERED and" } else { "" };
                debug!(address = %address, "{}{triggered} last seen {age:.3} seconds ago", record.name());

                record
                    .is_expired(now, &self.policy)
                    .then(|| address.clone())
            })
            .collect();

        expired
            .into_iter()
            .filter_map(|address| {
                let record = self.beacons.remove(&address)?;
                info!(address = %address, "Expired {}", record.name());
                Some((address, record))
            })
            .collect()
    }

    /// Remove and return every record, expired or not.
    pub fn drain(&mut self) -> Vec<(String, BeaconRecord)> {
        self.beacons.drain().collect()
    }

    /// Seed the registry from retained messages fetched at startup.
    ///
    /// Malformed messages and absence announcements are skipped. Seeded
    /// records are stamped with the current time, not the time embedded in
    /// the message. Returns the number of records seeded.
    pub fn bootstrap<I, P>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let now = self.clock.now();
        let mut seeded = 0;

        for payload in messages {
            let message = match PresenceMessage::from_slice(payload.as_ref()) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Dropping retained message");
                    continue;
                }
            };
            if !message.presence {
                debug!(address = %message.address, "Skipping retained absence for {}", message.name);
                continue;
            }

            info!(address = %message.address, "Init retained beacon {}", message.name);
            let record = message.into_record(now);
            self.beacons.insert(record.address().to_string(), record);
            seeded += 1;
        }

        seeded
    }
}
