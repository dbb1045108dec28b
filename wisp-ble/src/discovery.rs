//! Peripheral discovery and the single active connection
//!
//! `DiscoveryManager` owns the scan lifecycle and at most one connected
//! peripheral. Sessions borrow the live link through `get_active_connection`;
//! the manager stays the only authority on whether that link is alive.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::link::{Link, PeripheralHandle, Radio, RadioEvent, RadioState};
use crate::{ProvisionError, TransportError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sightings from one scan. Ends when the scan stops, times out or the radio goes away.
pub struct Sightings {
    rx: mpsc::UnboundedReceiver<Result<PeripheralHandle, ProvisionError>>,
}

impl Stream for Sightings {
    type Item = Result<PeripheralHandle, ProvisionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Live link lent to a provisioning session
#[derive(Clone)]
pub struct ActiveLink<L> {
    pub link: L,
    state: watch::Receiver<bool>,
}

impl<L: Link> ActiveLink<L> {
    pub fn id(&self) -> String {
        self.link.id()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    /// Connection-state updates: `false` once the link is gone
    pub fn state(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }
}

struct ScanTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct ActiveConnection<L> {
    id: String,
    epoch: u64,
    link: L,
    state: watch::Sender<bool>,
    observer: JoinHandle<()>,
}

type ActiveSlot<L> = Arc<Mutex<Option<ActiveConnection<L>>>>;

pub struct DiscoveryManager<R: Radio> {
    radio: Arc<R>,
    config: ScanConfig,
    scan: Mutex<Option<ScanTask>>,
    active: ActiveSlot<R::Link>,
    epoch: AtomicU64,
}

fn scan_error(e: TransportError) -> ProvisionError {
    match e {
        TransportError::PermissionDenied => ProvisionError::PermissionDenied,
        other => {
            warn!(error = %other, "radio refused to scan");
            ProvisionError::RadioUnavailable
        }
    }
}

fn matches_filter(peripheral: &PeripheralHandle, filter: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    peripheral
        .name
        .as_deref()
        .is_some_and(|name| name.contains(filter))
}

impl<R: Radio> DiscoveryManager<R> {
    pub fn new(radio: R, config: ScanConfig) -> Self {
        Self {
            radio: Arc::new(radio),
            config,
            scan: Mutex::new(None),
            active: Arc::new(Mutex::new(None)),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Start a scan reporting every peripheral whose advertised name contains
    /// `name_filter`, at most once per identifier. A running scan is stopped first.
    pub async fn scan(&self, name_filter: &str) -> Result<Sightings, ProvisionError> {
        self.stop_scan().await;

        if self.radio.state().await.map_err(scan_error)? != RadioState::PoweredOn {
            return Err(ProvisionError::RadioUnavailable);
        }

        let mut events = self.radio.events().await.map_err(scan_error)?;
        self.radio.start_scan().await.map_err(scan_error)?;
        info!(filter = name_filter, timeout = ?self.config.timeout(), "scan started");

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, mut stopped) = oneshot::channel::<()>();
        let radio = self.radio.clone();
        let filter = name_filter.to_string();
        let timeout = self.config.timeout();

        let handle = tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let mut seen = HashSet::new();

            let reason = loop {
                tokio::select! {
                    _ = &mut stopped => break "stopped",
                    () = &mut deadline => break "timed out",
                    event = events.next() => match event {
                        Some(RadioEvent::Sighted(peripheral)) => {
                            if !matches_filter(&peripheral, &filter) || !seen.insert(peripheral.id.clone()) {
                                continue;
                            }
                            debug!(id = %peripheral.id, name = ?peripheral.name, rssi = ?peripheral.rssi, "sighted");
                            if tx.send(Ok(peripheral)).is_err() {
                                break "receiver dropped";
                            }
                        }
                        Some(RadioEvent::StateChanged(RadioState::PoweredOff)) => {
                            let _ = tx.send(Err(ProvisionError::RadioUnavailable));
                            break "radio powered off";
                        }
                        Some(_) => {}
                        None => break "event stream closed",
                    },
                }
            };

            if let Err(e) = radio.stop_scan().await {
                warn!(error = %e, "failed to stop scan");
            }
            info!(reason, sightings = seen.len(), "scan finished");
        });

        *lock(&self.scan) = Some(ScanTask { stop, handle });
        Ok(Sightings { rx })
    }

    /// Stop the current scan. Safe to call when nothing is scanning.
    pub async fn stop_scan(&self) {
        let task = lock(&self.scan).take();
        if let Some(task) = task {
            let _ = task.stop.send(());
            let _ = task.handle.await;
        }
    }

    /// Scan until `accept` picks a sighting. `DeviceNotFound` when the scan
    /// ends without one.
    pub async fn find(
        &self,
        name_filter: &str,
        mut accept: impl FnMut(&PeripheralHandle) -> bool,
    ) -> Result<PeripheralHandle, ProvisionError> {
        let mut sightings = self.scan(name_filter).await?;
        while let Some(sighting) = sightings.next().await {
            let peripheral = sighting?;
            if accept(&peripheral) {
                self.stop_scan().await;
                return Ok(peripheral);
            }
        }
        self.stop_scan().await;
        Err(ProvisionError::DeviceNotFound(name_filter.to_string()))
    }

    /// Connect to `id`, replacing any existing connection.
    ///
    /// The returned receiver flips to `false` on any later disconnect, whether
    /// the peripheral dropped the link or `disconnect` was called.
    pub async fn connect(&self, id: &str) -> Result<watch::Receiver<bool>, ProvisionError> {
        self.disconnect().await;

        let events = self
            .radio
            .events()
            .await
            .map_err(|e| ProvisionError::ConnectionFailed(e.to_string()))?;

        info!(id, "connecting");
        let link = match tokio::time::timeout(self.config.connect_timeout(), self.radio.connect(id)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!(id, error = %e, "connect failed");
                return Err(ProvisionError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                warn!(id, "connect timed out");
                return Err(ProvisionError::ConnectionFailed("timed out".to_string()));
            }
        };

        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let (state, rx) = watch::channel(true);

        {
            // the observer cannot look at the slot before it is filled
            let mut slot = lock(&self.active);
            let observer = tokio::spawn(observe_disconnect(
                events,
                id.to_string(),
                epoch,
                self.active.clone(),
            ));
            *slot = Some(ActiveConnection {
                id: id.to_string(),
                epoch,
                link,
                state,
                observer,
            });
        }
        info!(id, "connected");
        Ok(rx)
    }

    /// Tear down the active connection, if any
    pub async fn disconnect(&self) {
        let connection = lock(&self.active).take();
        if let Some(connection) = connection {
            connection.observer.abort();
            if let Err(e) = connection.link.disconnect().await {
                warn!(id = %connection.id, error = %e, "disconnect failed");
            }
            let _ = connection.state.send(false);
            info!(id = %connection.id, "disconnected");
        }
    }

    /// The live link, but only if `id` is the active connection
    pub fn get_active_connection(&self, id: &str) -> Result<ActiveLink<R::Link>, ProvisionError> {
        match lock(&self.active).as_ref() {
            Some(c) if c.id == id => Ok(ActiveLink {
                link: c.link.clone(),
                state: c.state.subscribe(),
            }),
            _ => Err(ProvisionError::ConnectionFailed(format!("{id} is not connected"))),
        }
    }

    pub fn active_id(&self) -> Option<String> {
        lock(&self.active).as_ref().map(|c| c.id.clone())
    }
}

impl<R: Radio> Drop for DiscoveryManager<R> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.scan).take() {
            let _ = task.stop.send(());
        }
        if let Some(connection) = lock(&self.active).take() {
            connection.observer.abort();
        }
    }
}

async fn observe_disconnect<L: Link>(
    mut events: BoxStream<'static, RadioEvent>,
    id: String,
    epoch: u64,
    active: ActiveSlot<L>,
) {
    while let Some(event) = events.next().await {
        let lost = match &event {
            RadioEvent::Disconnected(gone) => gone == &id,
            RadioEvent::StateChanged(RadioState::PoweredOff) => true,
            _ => false,
        };
        if !lost {
            continue;
        }

        let mut slot = lock(&active);
        if slot.as_ref().is_some_and(|c| c.epoch == epoch) {
            if let Some(connection) = slot.take() {
                info!(id, "peripheral disconnected");
                let _ = connection.state.send(false);
            }
        }
        return;
    }
}
