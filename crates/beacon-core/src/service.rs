//! The scan/sweep cycle.
//!
//! [`PresenceService`] owns the registry outright. Scan backends only ever
//! see the sending half of a channel; the service drains the receiving half
//! and is the sole caller of registry operations. Registry calls return owned
//! snapshots before anything is awaited, so broker and scanner I/O never run
//! while the registry is borrowed.
//!
//! Each cycle:
//! 1. start scanning
//! 2. apply detections until the scan window elapses
//! 3. stop scanning and apply whatever is still queued
//! 4. sweep expired beacons and announce them as absent
//!
//! Every publish is bounded by [`ServiceOptions::publish_timeout`]. A broker
//! that stops answering costs one failed publish per update, never the cycle.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::bluetooth::{Detection, ScanFeed};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::BeaconError;
use crate::publisher::{Broker, PresencePublisher};
use crate::registry::PresenceRegistry;
use crate::types::PresenceUpdate;

/// Capacity of the detection channel.
pub const DETECTION_CHANNEL_CAPACITY: usize = 256;

/// Timing and shutdown behaviour of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// How long each scan window lasts.
    pub scan_window: Duration,
    /// How long to wait for retained messages at startup.
    pub bootstrap_grace: Duration,
    /// Upper bound on a single publish.
    pub publish_timeout: Duration,
    /// Announce every tracked beacon as absent on shutdown.
    pub announce_absent_on_shutdown: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ServiceOptions {
    /// Derive options from configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            scan_window: config.scanner.scan_window(),
            bootstrap_grace: config.broker.bootstrap_grace(),
            publish_timeout: config.broker.publish_timeout(),
            announce_absent_on_shutdown: config.presence.announce_absent_on_shutdown,
        }
    }
}

/// Counters for one scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Detections taken off the channel.
    pub detections: usize,
    /// Beacons announced as present.
    pub present: usize,
    /// Beacons expired and announced as absent.
    pub absent: usize,
    /// Publishes the broker rejected.
    pub publish_failures: usize,
}

/// Drives scanning, the presence registry and publishing.
pub struct PresenceService<S, B, C = SystemClock> {
    scanner: S,
    publisher: PresencePublisher<B>,
    registry: PresenceRegistry<C>,
    options: ServiceOptions,
    sink: mpsc::Sender<Detection>,
    detections: mpsc::Receiver<Detection>,
}

impl<S: ScanFeed, B: Broker> PresenceService<S, B, SystemClock> {
    /// Build a service on the system clock from configuration.
    pub fn from_config(config: &Config, scanner: S, broker: B) -> Self {
        let publisher = PresencePublisher::new(
            broker,
            config.presence.topic_prefix.clone(),
            config.scanner.name_prefix.clone(),
        );
        let registry =
            PresenceRegistry::new(config.scanner.name_prefix.clone(), config.presence.policy());
        Self::new(scanner, publisher, registry, ServiceOptions::from_config(config))
    }
}

impl<S: ScanFeed, B: Broker, C: Clock> PresenceService<S, B, C> {
    /// Assemble a service from its parts.
    pub fn new(
        scanner: S,
        publisher: PresencePublisher<B>,
        registry: PresenceRegistry<C>,
        options: ServiceOptions,
    ) -> Self {
        let (sink, detections) = mpsc::channel(DETECTION_CHANNEL_CAPACITY);
        Self {
            scanner,
            publisher,
            registry,
            options,
            sink,
            detections,
        }
    }

    /// The presence registry.
    pub const fn registry(&self) -> &PresenceRegistry<C> {
        &self.registry
    }

    /// The publisher.
    pub const fn publisher(&self) -> &PresencePublisher<B> {
        &self.publisher
    }

    /// Consume the service, returning the publisher and its broker.
    pub fn into_publisher(self) -> PresencePublisher<B> {
        self.publisher
    }

    /// Seed the registry from retained broker state. Call once before [`run`](Self::run).
    ///
    /// A broker failure here is logged and the service starts empty.
    pub async fn bootstrap(&mut self) -> usize {
        match self
            .publisher
            .fetch_retained(self.options.bootstrap_grace)
            .await
        {
            Ok(messages) => {
                let seeded = self.registry.bootstrap(&messages);
                info!(
                    received = messages.len(),
                    seeded, "Seeded registry from retained presence"
                );
                seeded
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Could not fetch retained presence, starting empty");
                0
            }
        }
    }

    /// Run cycles until `shutdown` resolves, then shut down.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let mut report = CycleReport::default();
            self.start_scan().await;

            let interrupted = tokio::select! {
                () = self.scan_window(&mut report) => false,
                () = &mut shutdown => true,
            };
            if interrupted {
                break;
            }

            self.finish_cycle(&mut report).await;
            debug!(?report, tracked = self.registry.len(), "Cycle complete");
        }

        self.shutdown().await;
    }

    /// Run a single scan cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        self.start_scan().await;
        self.scan_window(&mut report).await;
        self.finish_cycle(&mut report).await;
        report
    }

    /// Stop scanning and, if configured, announce every tracked beacon as absent.
    pub async fn shutdown(&mut self) {
        self.stop_scan().await;

        if !self.options.announce_absent_on_shutdown {
            info!(tracked = self.registry.len(), "Shutting down, retained presence left in place");
            return;
        }

        let records = self.registry.drain();
        info!(count = records.len(), "Shutting down, announcing all beacons absent");
        let mut report = CycleReport::default();
        for (_, record) in records {
            self.publish(&PresenceUpdate::absent(record), &mut report).await;
        }
    }

    async fn start_scan(&mut self) {
        debug!("Starting scan");
        if let Err(e) = self.scanner.start(self.sink.clone()).await {
            error!(error = %e, code = e.error_code(), "Failed to start scan");
        }
    }

    async fn stop_scan(&mut self) {
        debug!("Stopping scan");
        if let Err(e) = self.scanner.stop().await {
            error!(error = %e, code = e.error_code(), "Failed to stop scan");
        }
    }

    async fn scan_window(&mut self, report: &mut CycleReport) {
        let deadline = Instant::now() + self.options.scan_window;
        while let Ok(Some(detection)) = timeout_at(deadline, self.detections.recv()).await {
            self.handle_detection(&detection, report).await;
        }
    }

    async fn finish_cycle(&mut self, report: &mut CycleReport) {
        self.stop_scan().await;

        while let Ok(detection) = self.detections.try_recv() {
            self.handle_detection(&detection, report).await;
        }

        debug!("Checking for expired beacons");
        for (_, record) in self.registry.sweep_expired() {
            report.absent += 1;
            self.publish(&PresenceUpdate::absent(record), report).await;
        }
    }

    async fn handle_detection(&mut self, detection: &Detection, report: &mut CycleReport) {
        report.detections += 1;
        if let Some(update) = self.registry.apply(detection).into_update() {
            report.present += 1;
            self.publish(&update, report).await;
        }
    }

    async fn publish(&self, update: &PresenceUpdate, report: &mut CycleReport) {
        let limit = self.options.publish_timeout;
        let result = timeout(limit, self.publisher.publish(update))
            .await
            .unwrap_or_else(|_| {
                Err(BeaconError::PublishFailed {
                    topic: self.publisher.topic_for(&update.record),
                    message: format!("no answer within {}ms", limit.as_millis()),
                })
            });

        if let Err(e) = result {
            report.publish_failures += 1;
            error!(
                error = %e,
                code = e.error_code(),
                address = update.record.address(),
                "Failed to publish presence"
            );
        }
    }
}
