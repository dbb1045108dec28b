//! One provisioning attempt against a connected peripheral
//!
//! ```text
//! initialize ──► subscribe_to_status ──► send_credentials ──► StatusStream
//!                  (best effort)            │
//!                                           └─ driver task: notifications,
//!                                              deadline, link state
//! ```
//!
//! Status decisions live in [`crate::machine`]; this module only moves events
//! into it and statuses out of it.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::ready;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wisp_proto::StatusToken;

use crate::config::SessionConfig;
use crate::credentials::ProvisioningCredentials;
use crate::discovery::{ActiveLink, DiscoveryManager};
use crate::link::{CharacteristicDescriptor, Link, Notification, Radio};
use crate::machine::{Machine, Phase, SessionEvent};
use crate::negotiate::{Negotiated, negotiate, try_in_order};
use crate::{ProvisionError, ProvisioningStatus, TransportError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Statuses of one provisioning attempt. Ends after the terminal status.
pub struct StatusStream {
    rx: mpsc::UnboundedReceiver<ProvisioningStatus>,
}

impl StatusStream {
    /// Drain the stream and return the last status seen
    pub async fn finish(mut self) -> Option<ProvisioningStatus> {
        let mut last = None;
        while let Some(status) = self.rx.recv().await {
            last = Some(status);
        }
        last
    }
}

impl Stream for StatusStream {
    type Item = ProvisioningStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// What `cleanup` actually released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub timer_cancelled: bool,
    pub unsubscribed: bool,
}

struct Subscription {
    characteristic: CharacteristicDescriptor,
    /// Handed to the driver when the credentials go out
    stream: Option<BoxStream<'static, Notification>>,
}

pub struct ProvisioningSession<L: Link> {
    config: SessionConfig,
    machine: Arc<Mutex<Machine>>,
    link: Option<ActiveLink<L>>,
    negotiated: Option<Negotiated>,
    subscription: Option<Subscription>,
    driver: Option<JoinHandle<()>>,
}

impl<L: Link> ProvisioningSession<L> {
    pub fn new(config: SessionConfig) -> Self {
        let machine = Machine::new(config.strict_deadline);
        Self {
            config,
            machine: Arc::new(Mutex::new(machine)),
            link: None,
            negotiated: None,
            subscription: None,
            driver: None,
        }
    }

    pub fn phase(&self) -> Phase {
        lock(&self.machine).phase()
    }

    /// Most recent status, including the terminal one
    pub fn last_status(&self) -> Option<ProvisioningStatus> {
        lock(&self.machine).last().cloned()
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Borrow the active link for `peripheral_id` from `manager` and pick
    /// the service and characteristics to use.
    pub async fn initialize<R>(
        &mut self,
        manager: &DiscoveryManager<R>,
        peripheral_id: &str,
    ) -> Result<(), ProvisionError>
    where
        R: Radio<Link = L>,
    {
        lock(&self.machine).begin_negotiation()?;

        let result = async {
            let active = manager.get_active_connection(peripheral_id)?;
            let services = active
                .link
                .discover_services()
                .await
                .map_err(|e| ProvisionError::ConnectionFailed(e.to_string()))?;
            let negotiated = negotiate(&services, &self.config.extra_service_uuids).await?;
            Ok::<_, ProvisionError>((active, negotiated))
        }
        .await;

        match result {
            Ok((active, negotiated)) => {
                info!(
                    id = peripheral_id,
                    service = %negotiated.service.uuid,
                    tier = ?negotiated.tier,
                    status_channel = negotiated.status.is_some(),
                    "session initialized"
                );
                self.link = Some(active);
                self.negotiated = Some(negotiated);
                Ok(())
            }
            Err(e) => {
                warn!(id = peripheral_id, error = %e, "session initialization failed");
                lock(&self.machine).fail(e.clone());
                Err(e)
            }
        }
    }

    /// Enable status notifications. Returns whether they are on; a missing or
    /// broken status channel only means the deadline decides the outcome.
    pub async fn subscribe_to_status(&mut self) -> Result<bool, ProvisionError> {
        lock(&self.machine).expect_negotiated("subscribe to status")?;
        let (Some(active), Some(negotiated)) = (&self.link, &self.negotiated) else {
            return Err(ProvisionError::InvalidState {
                action: "subscribe to status",
                phase: Phase::Idle.name(),
            });
        };
        if self.subscription.is_some() {
            return Ok(true);
        }

        let Some(characteristic) = negotiated.status.clone() else {
            warn!("peripheral has no status channel, relying on the deadline");
            return Ok(false);
        };
        if !characteristic.props.notifiable() {
            warn!(characteristic = %characteristic.uuid, "status channel cannot notify, relying on the deadline");
            return Ok(false);
        }

        // listen before enabling so nothing sent right after the CCCD write is lost
        let notifications = match active.link.notifications().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "notification stream unavailable, relying on the deadline");
                return Ok(false);
            }
        };
        if let Err(e) = active.link.subscribe(&characteristic).await {
            warn!(characteristic = %characteristic.uuid, error = %e, "subscribe failed, relying on the deadline");
            return Ok(false);
        }

        let uuid = characteristic.uuid;
        debug!(characteristic = %uuid, "subscribed to status");
        self.subscription = Some(Subscription {
            characteristic,
            stream: Some(notifications.filter(move |n| ready(n.uuid == uuid)).boxed()),
        });
        lock(&self.machine).listening();
        Ok(true)
    }

    /// Validate and write the credentials, trying each configured encoding in
    /// turn. On success the returned stream reports progress until the
    /// attempt ends.
    pub async fn send_credentials(
        &mut self,
        credentials: &ProvisioningCredentials,
    ) -> Result<StatusStream, ProvisionError> {
        lock(&self.machine).expect_negotiated("send credentials")?;
        credentials.validate()?;

        let (Some(active), Some(negotiated)) = (self.link.clone(), self.negotiated.as_ref()) else {
            return Err(ProvisionError::InvalidState {
                action: "send credentials",
                phase: Phase::Idle.name(),
            });
        };
        if !active.is_connected() {
            return Err(self.lost_before_write());
        }

        let json = credentials
            .to_payload()
            .to_json()
            .map_err(|e| ProvisionError::UnknownError(e.to_string()))?;
        debug!(?credentials, "sending credentials");

        // anything queued so far predates this write and cannot answer it
        if let Some(queued) = self.subscription.as_mut().and_then(|s| s.stream.as_mut()) {
            let mut stale = 0;
            while let Some(Some(_)) = queued.next().now_or_never() {
                stale += 1;
            }
            if stale > 0 {
                debug!(stale, "dropped status notifications sent before the write");
            }
        }

        let characteristic = &negotiated.credentials;
        let mode = characteristic.write_mode();
        let link = &active.link;
        let json = json.as_str();

        let written = try_in_order(self.config.encodings.iter().copied(), |encoding| async move {
            let data = encoding.encode(json);
            match link.write(characteristic, &data, mode).await {
                Ok(()) => Ok(encoding),
                Err(e) => {
                    debug!(%encoding, error = %e, "write rejected");
                    Err((encoding, e))
                }
            }
        })
        .await;

        let encoding = match written {
            Ok(encoding) => encoding,
            Err(errors) => {
                let link_lost = errors.iter().any(|(_, e)| *e == TransportError::NotConnected);
                if link_lost || !active.is_connected() {
                    return Err(self.lost_before_write());
                }
                let detail = if errors.is_empty() {
                    "no encodings configured".to_string()
                } else {
                    errors
                        .iter()
                        .map(|(encoding, e)| format!("{encoding}: {e}"))
                        .collect::<Vec<_>>()
                        .join("; ")
                };
                let error = ProvisionError::WriteFailed(detail);
                warn!(error = %error, "credentials write failed");
                lock(&self.machine).fail(error.clone());
                return Err(error);
            }
        };
        info!(%encoding, %mode, characteristic = %characteristic.uuid, "credentials written");

        lock(&self.machine).credentials_written();
        let notifications = self
            .subscription
            .as_mut()
            .and_then(|s| s.stream.take())
            .unwrap_or_else(|| stream::pending().boxed());

        let (tx, rx) = mpsc::unbounded_channel();
        self.driver = Some(tokio::spawn(drive(
            self.machine.clone(),
            notifications,
            active.state(),
            self.config.status_deadline(),
            tx,
        )));
        Ok(StatusStream { rx })
    }

    fn lost_before_write(&self) -> ProvisionError {
        let status = lock(&self.machine).on_event(SessionEvent::Disconnected);
        let error = match status {
            Some(ProvisioningStatus::Error { cause, .. }) => cause,
            _ => ProvisionError::ConnectionFailed("peripheral disconnected".to_string()),
        };
        warn!(error = %error, "link lost before credentials were written");
        error
    }

    /// Release the deadline timer and status subscription. Safe to call any
    /// number of times; later calls release nothing.
    pub async fn cleanup(&mut self) -> CleanupReport {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        let timer_cancelled = lock(&self.machine).close();

        let mut unsubscribed = false;
        if let Some(subscription) = self.subscription.take() {
            if let Some(active) = &self.link {
                if let Err(e) = active.link.unsubscribe(&subscription.characteristic).await {
                    debug!(error = %e, "unsubscribe failed");
                }
            }
            unsubscribed = true;
        }
        self.link = None;
        self.negotiated = None;

        let report = CleanupReport {
            timer_cancelled,
            unsubscribed,
        };
        debug!(?report, "session cleaned up");
        report
    }
}

impl<L: Link> Drop for ProvisioningSession<L> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Feed notifications, the deadline and link loss into the machine until it
/// produces a terminal status.
async fn drive(
    machine: Arc<Mutex<Machine>>,
    mut notifications: BoxStream<'static, Notification>,
    mut link_state: watch::Receiver<bool>,
    deadline: Duration,
    tx: mpsc::UnboundedSender<ProvisioningStatus>,
) {
    let timer = tokio::time::sleep(deadline);
    tokio::pin!(timer);
    let mut listening = true;
    let mut watching = true;

    loop {
        let armed = lock(&machine).deadline_armed();
        let event = tokio::select! {
            // a status the device already sent outranks a disconnect seen at the same time
            biased;
            notification = notifications.next(), if listening => match notification {
                Some(n) => match StatusToken::decode(&n.value) {
                    Some(token) => {
                        debug!(token = token.as_str(), "status notification");
                        SessionEvent::Notification(token)
                    }
                    None => continue,
                },
                None => {
                    debug!("notification stream ended");
                    listening = false;
                    continue;
                }
            },
            changed = link_state.changed(), if watching => match changed {
                Ok(()) if *link_state.borrow_and_update() => continue,
                Ok(()) => SessionEvent::Disconnected,
                Err(_) => {
                    watching = false;
                    if *link_state.borrow() {
                        continue;
                    }
                    SessionEvent::Disconnected
                }
            },
            () = &mut timer, if armed => SessionEvent::Deadline,
            else => break,
        };

        let status = lock(&machine).on_event(event);
        if let Some(status) = status {
            let terminal = status.is_terminal();
            info!(status = %status.message(), progress = ?status.progress(), terminal, "provisioning status");
            if tx.send(status).is_err() || terminal {
                break;
            }
        }
    }
}
