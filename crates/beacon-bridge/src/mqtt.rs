//! MQTT broker client.
//!
//! Wraps a `rumqttc` [`AsyncClient`] whose event loop is driven on a
//! background task. The event loop reconnects on its own after a failure.
//! Requests issued while disconnected wait in the client's bounded queue;
//! once that queue is full they fail immediately instead of waiting for room.

use std::time::Duration;

use beacon_core::config::BrokerConfig;
use beacon_core::error::{BeaconError, Result};
use beacon_core::publisher::{Broker, QoS};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

/// Requests the client may queue before new ones are rejected.
const CLIENT_CAPACITY: usize = 64;

/// Incoming publishes buffered for the retained-message fetch.
const INCOMING_CAPACITY: usize = 256;

/// Pause between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long [`MqttBroker::connect`] waits for the first `CONNACK`.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long [`MqttBroker::disconnect`] waits for queued publishes to flush.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// MQTT connection used as the presence [`Broker`].
pub struct MqttBroker {
    client: AsyncClient,
    incoming: Mutex<mpsc::Receiver<Publish>>,
    connected: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl MqttBroker {
    /// Connect to the configured broker, waiting for the first acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::BrokerUnavailable`] if the broker does not accept
    /// the connection in time.
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        Self::connect_within(config, CONNECT_TIMEOUT).await
    }

    async fn connect_within(config: &BrokerConfig, limit: Duration) -> Result<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, CLIENT_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let (connected_tx, mut connected_rx) = watch::channel(false);
        let task = tokio::spawn(drive(event_loop, incoming_tx, connected_tx));

        info!(host = %config.host, port = config.port, "Connecting to MQTT broker");
        match timeout(limit, connected_rx.wait_for(|up| *up)).await {
            Ok(Ok(_)) => {}
            _ => {
                task.abort();
                return Err(BeaconError::BrokerUnavailable(format!(
                    "no CONNACK from {}:{} within {}ms",
                    config.host,
                    config.port,
                    limit.as_millis()
                )));
            }
        }

        Ok(Self {
            client,
            incoming: Mutex::new(incoming_rx),
            connected: connected_rx,
            task,
        })
    }

    /// Whether the event loop currently holds a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Flush queued publishes and close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::BrokerUnavailable`] if the disconnect request
    /// could not be queued. The event loop is stopped either way.
    pub async fn disconnect(self) -> Result<()> {
        let queued = self.client.try_disconnect().map_err(unavailable);

        if queued.is_ok() {
            let mut connected = self.connected.clone();
            if timeout(DISCONNECT_TIMEOUT, connected.wait_for(|up| !*up))
                .await
                .is_err()
            {
                warn!("Timed out waiting for broker disconnect");
            }
        }
        self.task.abort();
        queued
    }
}

impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, mqtt_qos(qos), retain, payload)
            .map_err(|e| BeaconError::PublishFailed {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn fetch_retained(&self, topic_filter: &str, grace: Duration) -> Result<Vec<Vec<u8>>> {
        let mut incoming = self.incoming.lock().await;
        while incoming.try_recv().is_ok() {}

        self.client
            .try_subscribe(topic_filter, rumqttc::QoS::AtLeastOnce)
            .map_err(unavailable)?;

        let deadline = Instant::now() + grace;
        let mut messages = Vec::new();
        while let Ok(Some(publish)) = timeout_at(deadline, incoming.recv()).await {
            // An empty retained payload is a cleared topic.
            if publish.retain && !publish.payload.is_empty() {
                debug!(topic = %publish.topic, "Received retained presence");
                messages.push(publish.payload.to_vec());
            }
        }

        self.client
            .try_unsubscribe(topic_filter)
            .map_err(unavailable)?;

        Ok(messages)
    }
}

async fn drive(
    mut event_loop: EventLoop,
    incoming: mpsc::Sender<Publish>,
    connected: watch::Sender<bool>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                connected.send_replace(true);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if incoming.try_send(publish).is_err() {
                    trace!("Dropping unsolicited publish");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent");
                connected.send_replace(false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.send_replace(false) {
                    warn!(error = %e, "Lost connection to MQTT broker");
                } else {
                    debug!(error = %e, "MQTT broker still unreachable");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

const fn mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

#[allow(clippy::needless_pass_by_value)]
fn unavailable(err: ClientError) -> BeaconError {
    BeaconError::BrokerUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(mqtt_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(mqtt_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(mqtt_qos(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    /// A broker whose event loop is never polled, so its request queue only fills.
    fn stalled_broker(capacity: usize) -> (MqttBroker, EventLoop) {
        let options = MqttOptions::new("beacon-bridge-test", "127.0.0.1", 9);
        let (client, event_loop) = AsyncClient::new(options, capacity);
        let (_incoming_tx, incoming_rx) = mpsc::channel(1);
        let (_connected_tx, connected_rx) = watch::channel(false);

        let broker = MqttBroker {
            client,
            incoming: Mutex::new(incoming_rx),
            connected: connected_rx,
            task: tokio::spawn(async {}),
        };
        (broker, event_loop)
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_queue_is_full() {
        let (broker, _event_loop) = stalled_broker(2);

        for _ in 0..2 {
            broker
                .publish("presence/ABC", b"{}".to_vec(), QoS::AtLeastOnce, true)
                .await
                .unwrap();
        }

        let err = timeout(
            Duration::from_secs(1),
            broker.publish("presence/ABC", b"{}".to_vec(), QoS::AtLeastOnce, true),
        )
        .await
        .expect("publish waited for queue space")
        .unwrap_err();

        assert!(matches!(err, BeaconError::PublishFailed { ref topic, .. } if topic == "presence/ABC"));
        assert!(err.is_recoverable());
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_with_full_queue_returns() {
        let (broker, _event_loop) = stalled_broker(1);
        broker
            .publish("presence/ABC", b"{}".to_vec(), QoS::AtLeastOnce, true)
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(1), broker.disconnect())
            .await
            .expect("disconnect waited for queue space");
        assert!(result.unwrap_err().is_broker_error());
    }

    #[tokio::test]
    async fn test_connect_fails_without_broker() {
        let config = BrokerConfig {
            host: "127.0.0.1".to_string(),
            // Reserved port, nothing listens here.
            port: 9,
            ..BrokerConfig::default()
        };

        let err = MqttBroker::connect_within(&config, Duration::from_millis(500))
            .await
            .err()
            .unwrap();
        assert!(err.is_broker_error());
        assert!(err.is_recoverable());
    }
}
