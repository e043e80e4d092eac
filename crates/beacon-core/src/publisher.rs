//! Publishing presence transitions as retained broker messages.
//!
//! Each tracked beacon owns one topic, `<topic_prefix>/<label>`, where the
//! label is the device name with the tracked prefix stripped. Every message is
//! retained with at-least-once delivery, so a subscriber joining late sees the
//! current presence of every beacon immediately.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::beacon::BeaconRecord;
use crate::error::Result;
use crate::message::PresenceMessage;
use crate::types::{Presence, PresenceUpdate};

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged, may be duplicated.
    AtLeastOnce,
    /// Acknowledged exactly once.
    ExactlyOnce,
}

/// The pub/sub client the bridge publishes through.
pub trait Broker: Send + Sync {
    /// Publish `payload` to `topic`.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to `topic_filter`, collect retained payloads for up to
    /// `grace`, then unsubscribe.
    fn fetch_retained(
        &self,
        topic_filter: &str,
        grace: Duration,
    ) -> impl Future<Output = Result<Vec<Vec<u8>>>> + Send;
}

/// Serializes presence updates onto per-beacon topics.
#[derive(Debug)]
pub struct PresencePublisher<B> {
    broker: B,
    topic_prefix: String,
    name_prefix: String,
}

impl<B: Broker> PresencePublisher<B> {
    /// Create a publisher.
    ///
    /// `name_prefix` is stripped from device names when building topic labels.
    pub fn new(broker: B, topic_prefix: impl Into<String>, name_prefix: impl Into<String>) -> Self {
        Self {
            broker,
            topic_prefix: topic_prefix.into(),
            name_prefix: name_prefix.into(),
        }
    }

    /// The underlying broker client.
    pub const fn broker(&self) -> &B {
        &self.broker
    }

    /// Take back the broker client.
    pub fn into_broker(self) -> B {
        self.broker
    }

    /// Topic a record is published on.
    #[must_use]
    pub fn topic_for(&self, record: &BeaconRecord) -> String {
        format!(
            "{}/{}",
            self.topic_prefix,
            topic_label(record, &self.name_prefix)
        )
    }

    /// Filter matching every beacon topic.
    #[must_use]
    pub fn retained_filter(&self) -> String {
        format!("{}/+", self.topic_prefix)
    }

    /// Publish one presence transition.
    ///
    /// # Errors
    ///
    /// Returns a broker error if the client rejects the publish.
    pub async fn publish(&self, update: &PresenceUpdate) -> Result<()> {
        let topic = self.topic_for(&update.record);
        let payload =
            PresenceMessage::from_record(&update.record, update.presence.is_present()).to_vec()?;

        debug!(
            %topic,
            presence = update.presence.is_present(),
            "Publishing {}",
            update.record
        );
        self.broker
            .publish(&topic, payload, QoS::AtLeastOnce, true)
            .await
    }

    /// Announce a beacon as present.
    ///
    /// # Errors
    ///
    /// See [`PresencePublisher::publish`].
    pub async fn publish_present(&self, record: &BeaconRecord) -> Result<()> {
        self.publish_record(record, Presence::Present).await
    }

    /// Announce a beacon as absent, with its last known state.
    ///
    /// # Errors
    ///
    /// See [`PresencePublisher::publish`].
    pub async fn publish_absent(&self, record: &BeaconRecord) -> Result<()> {
        self.publish_record(record, Presence::Absent).await
    }

    async fn publish_record(&self, record: &BeaconRecord, presence: Presence) -> Result<()> {
        self.publish(&PresenceUpdate {
            presence,
            record: record.clone(),
        })
        .await
    }

    /// Fetch every retained presence message currently held by the broker.
    ///
    /// # Errors
    ///
    /// Returns a broker error if the subscription fails.
    pub async fn fetch_retained(&self, grace: Duration) -> Result<Vec<Vec<u8>>> {
        self.broker
            .fetch_retained(&self.retained_filter(), grace)
            .await
    }
}

/// Topic label for a record: the name without the tracked prefix.
///
/// MQTT level separators and wildcards are replaced with `_`. A name that is
/// nothing but the prefix falls back to the hardware address.
#[must_use]
pub fn topic_label(record: &BeaconRecord, name_prefix: &str) -> String {
    let name = record.name();
    let label = name.strip_prefix(name_prefix).unwrap_or(name);
    let label = if label.is_empty() { record.address() } else { label };

    label
        .chars()
        .map(|c| if matches!(c, '/' | '+' | '#') { '_' } else { c })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use super::{Broker, QoS};
    use crate::error::{BeaconError, Result};

    /// One publish captured by [`RecordingBroker`].
    #[derive(Debug, Clone)]
    pub struct Published {
        pub topic: String,
        pub payload: Vec<u8>,
        pub qos: QoS,
        pub retain: bool,
    }

    impl Published {
        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.payload).unwrap()
        }
    }

    /// In-memory broker that records publishes and serves canned retained messages.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingBroker {
        published: Arc<Mutex<Vec<Published>>>,
        retained: Arc<Mutex<Vec<Vec<u8>>>>,
        offline: Arc<AtomicBool>,
        stalled: Arc<AtomicBool>,
    }

    impl RecordingBroker {
        pub fn with_retained(retained: Vec<Vec<u8>>) -> Self {
            let broker = Self::default();
            *broker.retained.lock().unwrap() = retained;
            broker
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Publishes never complete, like a client stuck behind a full queue.
        pub fn set_stalled(&self, stalled: bool) {
            self.stalled.store(stalled, Ordering::SeqCst);
        }

        pub fn published(&self) -> Vec<Published> {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl Broker for RecordingBroker {
        async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()> {
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(BeaconError::BrokerUnavailable("offline".into()));
            }
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Published {
                    topic: topic.to_string(),
                    payload,
                    qos,
                    retain,
                });
            Ok(())
        }

        async fn fetch_retained(&self, _topic_filter: &str, _grace: Duration) -> Result<Vec<Vec<u8>>> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(BeaconError::BrokerUnavailable("offline".into()));
            }
            Ok(self
                .retained
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone())
        }
    }
}
