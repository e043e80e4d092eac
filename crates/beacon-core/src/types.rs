//! Shared value types passed between the registry, service and publisher.

use crate::beacon::BeaconRecord;

/// Whether a beacon is being announced as arriving or leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Newly detected, or detected with a changed identity or signal.
    Present,
    /// Expired out of the registry.
    Absent,
}

impl Presence {
    /// The wire flag for this state.
    #[must_use]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Present)
    }
}

/// A presence transition to publish, carrying an owned snapshot of the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Direction of the transition.
    pub presence: Presence,
    /// Record state at the time of the transition.
    pub record: BeaconRecord,
}

impl PresenceUpdate {
    /// Announce a beacon as present.
    #[must_use]
    pub const fn present(record: BeaconRecord) -> Self {
        Self {
            presence: Presence::Present,
            record,
        }
    }

    /// Announce a beacon as absent.
    #[must_use]
    pub const fn absent(record: BeaconRecord) -> Self {
        Self {
            presence: Presence::Absent,
            record,
        }
    }
}
