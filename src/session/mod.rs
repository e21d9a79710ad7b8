//! Session Manager
//!
//! Owns the mapping from device id to its single live Device Link. Each device
//! has its own slot lock: a connect request for a device that already has a
//! link tears the old link down (unsubscribe, disconnect, stop its event pump)
//! and registers the new one while holding that device's slot, so two links
//! for the same device never coexist. The map itself is only locked long
//! enough to look up or replace a slot, so one device's slow teardown never
//! blocks another device's commands or the health report.
//!
//! Each link gets an event pump task that runs the Upgrade State Machine over
//! the link's reports in broker order and broadcasts the resulting events.

use crate::broadcast::Broadcaster;
use crate::cloud::CloudGateway;
use crate::config::DeviceSection;
use crate::device_span;
use crate::error::{sanitize_error_message, RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{
    validate_connect, ConnectRequest, DeviceCommand, DeviceId, NormalizedEvent, ServerEvent,
};
use crate::transport::{DeviceSession, DeviceTransport, LinkConnector, LinkEvent, LinkStatus};
use crate::upgrade::UpgradeTracker;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Result of a successful connect request
#[derive(Debug)]
pub struct ConnectOutcome {
    pub device_id: DeviceId,
    /// Non-fatal collaborator failures to report to the requester
    pub warnings: Vec<RelayError>,
}

struct ActiveLink {
    link: Box<dyn DeviceTransport>,
    pump: JoinHandle<()>,
}

/// One device's link; empty while the first link is being opened or after an open failed
type LinkSlot = Arc<Mutex<Option<ActiveLink>>>;

pub struct SessionManager {
    connector: Arc<dyn LinkConnector>,
    gateway: CloudGateway,
    broadcaster: Arc<Broadcaster>,
    device: DeviceSection,
    // Never held across an await on a slot or a link
    links: Mutex<HashMap<DeviceId, LinkSlot>>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn LinkConnector>,
        gateway: CloudGateway,
        broadcaster: Arc<Broadcaster>,
        device: DeviceSection,
    ) -> Self {
        Self {
            connector,
            gateway,
            broadcaster,
            device,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `request`, resolve its broker session and make it the device's only link
    pub async fn connect(&self, request: &ConnectRequest) -> RelayResult<ConnectOutcome> {
        validate_connect(request)?;
        let device_id = DeviceId::new(request.device_id());
        let mut warnings = Vec::new();

        let session = match request {
            ConnectRequest::Coordinates(coordinates) => DeviceSession::lan(
                device_id.clone(),
                &coordinates.host,
                &coordinates.access_code,
                &self.device,
            ),
            ConnectRequest::Credentials(credentials) => {
                let login = self.gateway.sign_in(credentials).await?;

                match self.gateway.compare_firmware(&device_id, &login).await {
                    Ok(events) => {
                        for event in &events {
                            self.broadcaster.broadcast(event).await;
                        }
                    }
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "Firmware comparison failed");
                        warnings.push(RelayError::from(e));
                    }
                }

                DeviceSession::cloud(
                    device_id.clone(),
                    self.gateway.region_section(login.region),
                    &login,
                    &self.device,
                )
            }
        };

        self.open(session).await?;
        Ok(ConnectOutcome {
            device_id,
            warnings,
        })
    }

    async fn open(&self, session: DeviceSession) -> RelayResult<()> {
        let device_id = session.device_id.clone();
        let (slot, mut current) = self.lock_slot(&device_id).await;

        if let Some(previous) = current.take() {
            info!(device_id = %device_id, "Superseding existing device link");
            metrics().link_superseded();
            teardown(&device_id, previous).await;
        }

        let (events_tx, events_rx) = mpsc::channel(self.device.event_capacity);
        let link = match self.connector.open(session, events_tx).await {
            Ok(link) => link,
            Err(e) => {
                self.prune(&device_id, &slot, &current).await;
                return Err(e.into());
            }
        };
        let pump = tokio::spawn(
            pump_events(device_id.clone(), events_rx, self.broadcaster.clone())
                .instrument(device_span!(device_id)),
        );

        *current = Some(ActiveLink { link, pump });
        drop(current);

        let active = self.active_link_count().await;
        metrics().link_opened();
        metrics().set_active_links(active);
        info!(device_id = %device_id, active_links = active, "Device link opened");
        Ok(())
    }

    /// Lock the device's slot, creating it if needed
    ///
    /// Retries when the slot was removed from the map while we waited for it,
    /// so a link is never installed into a slot nobody can reach.
    async fn lock_slot(
        &self,
        device_id: &DeviceId,
    ) -> (LinkSlot, OwnedMutexGuard<Option<ActiveLink>>) {
        loop {
            let slot = self
                .links
                .lock()
                .await
                .entry(device_id.clone())
                .or_default()
                .clone();
            let guard = slot.clone().lock_owned().await;
            let current = self
                .links
                .lock()
                .await
                .get(device_id)
                .is_some_and(|registered| Arc::ptr_eq(registered, &slot));
            if current {
                return (slot, guard);
            }
        }
    }

    /// Drop the device's slot if it is still registered and holds no link
    async fn prune(&self, device_id: &DeviceId, slot: &LinkSlot, current: &Option<ActiveLink>) {
        if current.is_some() {
            return;
        }
        let mut links = self.links.lock().await;
        if links
            .get(device_id)
            .is_some_and(|registered| Arc::ptr_eq(registered, slot))
        {
            links.remove(device_id);
        }
    }

    async fn slot(&self, device_id: &DeviceId) -> Option<LinkSlot> {
        self.links.lock().await.get(device_id).cloned()
    }

    /// Hand `command` to the device's link
    pub async fn publish(&self, device_id: &DeviceId, command: DeviceCommand) -> RelayResult<()> {
        let no_link = || RelayError::NoActiveLink {
            device_id: Some(device_id.clone()),
        };
        let slot = self.slot(device_id).await.ok_or_else(no_link)?;
        let current = slot.lock().await;
        let active = current.as_ref().ok_or_else(no_link)?;

        match active.link.publish(&command).await {
            Ok(()) => {
                metrics().command_published();
                debug!(device_id = %device_id, command = command.name(), "Command published");
                Ok(())
            }
            Err(e) => {
                metrics().publish_failed();
                warn!(device_id = %device_id, command = command.name(), error = %e, "Command hand-off failed");
                Err(e.into())
            }
        }
    }

    /// Forward a manifest entry verbatim to the device
    pub async fn apply_upgrade(&self, device_id: &DeviceId, manifest_entry: Value) -> RelayResult<()> {
        self.publish(device_id, DeviceCommand::ApplyUpgrade { manifest_entry })
            .await
    }

    /// Re-send the probe sequence
    pub async fn probe(&self, device_id: &DeviceId) -> RelayResult<()> {
        self.publish(device_id, DeviceCommand::Probe).await
    }

    /// Tear down one device's link; false if it had none
    pub async fn disconnect(&self, device_id: &DeviceId) -> bool {
        let Some(slot) = self.slot(device_id).await else {
            return false;
        };
        let mut current = slot.lock().await;
        let Some(active) = current.take() else {
            return false;
        };
        teardown(device_id, active).await;
        self.prune(device_id, &slot, &current).await;
        drop(current);

        metrics().set_active_links(self.active_link_count().await);
        true
    }

    /// Tear down every link concurrently; used on process shutdown
    pub async fn shutdown_all(&self) {
        let slots: Vec<(DeviceId, LinkSlot)> = self.links.lock().await.drain().collect();

        let closed = join_all(slots.into_iter().map(|(device_id, slot)| async move {
            let active = slot.lock().await.take();
            match active {
                Some(active) => {
                    teardown(&device_id, active).await;
                    1
                }
                None => 0,
            }
        }))
        .await
        .into_iter()
        .sum::<usize>();

        metrics().set_active_links(0);
        info!(closed, "All device links closed");
    }

    /// Status of every device link, sorted by device id
    ///
    /// A device whose slot is busy (superseding or tearing down) reports
    /// `CONNECTING` instead of waiting for it.
    pub async fn statuses(&self) -> Vec<(DeviceId, LinkStatus)> {
        let slots: Vec<(DeviceId, LinkSlot)> = self
            .links
            .lock()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut statuses: Vec<_> = slots
            .into_iter()
            .filter_map(|(id, slot)| match slot.try_lock() {
                Ok(current) => current.as_ref().map(|active| (id, active.link.status())),
                Err(_) => Some((id, LinkStatus::Connecting)),
            })
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    pub async fn status(&self, device_id: &DeviceId) -> Option<LinkStatus> {
        let slot = self.slot(device_id).await?;
        let status = match slot.try_lock() {
            Ok(current) => current.as_ref().map(|active| active.link.status()),
            Err(_) => Some(LinkStatus::Connecting),
        };
        status
    }

    /// Devices with a link, counting ones mid-transition
    pub async fn active_link_count(&self) -> usize {
        self.statuses().await.len()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}

async fn teardown(device_id: &DeviceId, mut active: ActiveLink) {
    if let Err(e) = active.link.disconnect().await {
        warn!(device_id = %device_id, error = %e, "Device link did not close cleanly");
    }
    // Events still queued from the old link must not reach clients
    active.pump.abort();
    debug!(device_id = %device_id, "Device link torn down");
}

/// Classify one link's events in order and broadcast the results
async fn pump_events(
    device_id: DeviceId,
    mut events: mpsc::Receiver<LinkEvent>,
    broadcaster: Arc<Broadcaster>,
) {
    let mut tracker = UpgradeTracker::new();

    while let Some(event) = events.recv().await {
        let normalized = match event {
            LinkEvent::Connected { reconnect_count } => {
                vec![NormalizedEvent::Connected { reconnect_count }]
            }
            LinkEvent::ConnectFailed { reason } => vec![NormalizedEvent::ConnectFailed {
                reason: sanitize_error_message(&reason),
            }],
            LinkEvent::Report(report) => {
                let classified = tracker.classify(&report);
                metrics().events_classified(classified.len());
                classified
            }
        };

        for event in normalized {
            broadcaster.broadcast(&ServerEvent::from(event)).await;
        }
    }

    debug!(device_id = %device_id, "Device event stream ended");
}
