//! Bluetooth Low Energy scanning.
//!
//! This module provides:
//! - [`Detection`], one received advertisement
//! - [`ScanFeed`], the start/stop interface the service drives
//! - [`BluetoothScanner`], passive LE discovery through BlueZ (feature `bluetooth`)
//! - [`MockScanner`], scripted detections for tests and hardware-less runs
//!
//! Detections are delivered into an `mpsc` channel owned by the service. That
//! channel is the only way scan results reach the presence registry.

use std::future::Future;

use tokio::sync::mpsc;

use crate::advertisement::Advertisement;
use crate::error::Result;

/// One advertisement received from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Hardware address, e.g. `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    /// Advertised name, if the device broadcasts one.
    pub name: Option<String>,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Manufacturer data carried by the advertisement.
    pub advertisement: Advertisement,
}

/// A source of advertisement detections.
pub trait ScanFeed: Send {
    /// Begin scanning, sending every detection into `sink` until [`ScanFeed::stop`].
    fn start(&mut self, sink: mpsc::Sender<Detection>) -> impl Future<Output = Result<()>> + Send;

    /// Stop scanning. Calling this while not scanning is a no-op.
    fn stop(&mut self) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluetoothScanner;

#[cfg(feature = "bluetooth")]
mod bluez {
    use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
    use futures::{pin_mut, StreamExt};
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::JoinHandle;
    use tracing::{debug, info, trace};

    use super::{Detection, ScanFeed};
    use crate::advertisement::Advertisement;
    use crate::error::{BeaconError, Result};

    /// Passive LE scanner backed by BlueZ.
    pub struct BluetoothScanner {
        _session: Session,
        adapter: Adapter,
        task: Option<JoinHandle<()>>,
    }

    impl BluetoothScanner {
        /// Open a session on the named adapter, or the default one.
        ///
        /// # Errors
        ///
        /// Returns an error if no adapter is available or it cannot be powered on.
        pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
            let session = Session::new().await?;
            let adapter = match adapter_name {
                Some(name) => session.adapter(name)?,
                None => session.default_adapter().await?,
            };

            adapter.set_powered(true).await?;
            if !adapter.is_powered().await? {
                return Err(BeaconError::BluetoothAdapterPoweredOff);
            }

            adapter
                .set_discovery_filter(DiscoveryFilter {
                    transport: DiscoveryTransport::Le,
                    duplicate_data: true,
                    ..Default::default()
                })
                .await?;

            info!(adapter = adapter.name(), "Bluetooth adapter ready");

            Ok(Self {
                _session: session,
                adapter,
                task: None,
            })
        }
    }

    impl ScanFeed for BluetoothScanner {
        async fn start(&mut self, sink: mpsc::Sender<Detection>) -> Result<()> {
            if self.task.is_some() {
                return Ok(());
            }

            let adapter = self.adapter.clone();
            let (ready_tx, ready_rx) = oneshot::channel();

            let task = tokio::spawn(async move {
                let events = match adapter.discover_devices_with_changes().await {
                    Ok(events) => {
                        let _ = ready_tx.send(Ok(()));
                        events
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                pin_mut!(events);

                while let Some(event) = events.next().await {
                    let AdapterEvent::DeviceAdded(address) = event else {
                        continue;
                    };
                    match read_detection(&adapter, address).await {
                        Ok(Some(detection)) => {
                            if sink.send(detection).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => trace!(%address, error = %e, "Device vanished before it could be read"),
                    }
                }
                debug!("Discovery stream ended");
            });

            let ready = ready_rx.await.map_err(|_| {
                BeaconError::BluetoothScanFailed("discovery task exited before starting".into())
            })?;
            if let Err(e) = ready {
                task.abort();
                return Err(e.into());
            }

            self.task = Some(task);
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            if let Some(task) = self.task.take() {
                // Dropping the discovery stream inside the task ends the BlueZ discovery session.
                task.abort();
                let _ = task.await;
            }
            Ok(())
        }
    }

    async fn read_detection(adapter: &Adapter, address: Address) -> bluer::Result<Option<Detection>> {
        let device = adapter.device(address)?;
        let Some(rssi) = device.rssi().await? else {
            return Ok(None);
        };
        let name = device.name().await?;
        let data = device.manufacturer_data().await?.unwrap_or_default();

        Ok(Some(Detection {
            address: address.to_string(),
            name,
            rssi,
            advertisement: Advertisement::ManufacturerData(data),
        }))
    }
}

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::MockScanner;

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use tokio::sync::mpsc;

    use super::{Detection, ScanFeed};
    use crate::error::{BeaconError, Result};

    /// Scanner that replays scripted detections, one batch per scan window.
    ///
    /// Clones share the script and counters, so a test can keep a handle after
    /// moving the scanner into a service. Each batch is sent during `start`,
    /// so it must fit in the sink's capacity.
    #[derive(Debug, Clone, Default)]
    pub struct MockScanner {
        script: Arc<Mutex<VecDeque<Vec<Detection>>>>,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        fail_starts: Arc<AtomicUsize>,
    }

    impl MockScanner {
        /// An empty scanner; every window yields nothing.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue detections for the next unscripted scan window.
        pub fn push_window(&self, detections: Vec<Detection>) {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(detections);
        }

        /// Make the next `count` calls to `start` fail.
        pub fn fail_next_starts(&self, count: usize) {
            self.fail_starts.store(count, Ordering::SeqCst);
        }

        /// How many times scanning was started.
        #[must_use]
        pub fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        /// How many times scanning was stopped.
        #[must_use]
        pub fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    impl ScanFeed for MockScanner {
        async fn start(&mut self, sink: mpsc::Sender<Detection>) -> Result<()> {
            let failing = self
                .fail_starts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BeaconError::BluetoothScanFailed("scripted failure".into()));
            }

            self.starts.fetch_add(1, Ordering::SeqCst);
            let batch = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_default();

            for detection in batch {
                if sink.send(detection).await.is_err() {
                    break;
                }
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn detection(address: &str) -> Detection {
        Detection {
            address: address.to_string(),
            name: Some("VyroABC".to_string()),
            rssi: -60,
            advertisement: Advertisement::empty(),
        }
    }

    #[tokio::test]
    async fn test_mock_scanner_replays_windows_in_order() {
        let mut scanner = MockScanner::new();
        scanner.push_window(vec![detection("AA"), detection("BB")]);
        scanner.push_window(vec![detection("CC")]);

        let (tx, mut rx) = mpsc::channel(16);
        assert_ok!(scanner.start(tx.clone()).await);
        assert_ok!(scanner.stop().await);
        assert_eq!(rx.recv().await.unwrap().address, "AA");
        assert_eq!(rx.recv().await.unwrap().address, "BB");

        scanner.start(tx.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().address, "CC");

        scanner.start(tx).await.unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(scanner.starts(), 3);
        assert_eq!(scanner.stops(), 1);
    }

    #[tokio::test]
    async fn test_mock_scanner_scripted_failure() {
        let mut scanner = MockScanner::new();
        scanner.fail_next_starts(1);
        let (tx, _rx) = mpsc::channel(1);

        let err = assert_err!(scanner.start(tx.clone()).await);
        assert!(err.is_bluetooth_error());
        assert_ok!(scanner.start(tx).await);
        assert_eq!(scanner.starts(), 1);
    }
}
