//! Mock implementations for testing
//!
//! Provides a mock link connector and mock cloud collaborators so the session
//! manager and the WebSocket server can be exercised without a broker or the
//! network.

use crate::cloud::{CloudAccount, CloudError, DeviceFirmware, ManifestService, Region};
use crate::protocol::{DeviceCommand, DeviceFamily, DeviceId};
use crate::transport::{
    DeviceSession, DeviceTransport, LinkConnector, LinkEvent, LinkStatus, MqttError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Link lifecycle entries, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    /// Device and per-connector link number
    Opened(DeviceId, usize),
    Closed(DeviceId, usize),
}

#[derive(Default)]
struct ConnectorState {
    next_link: usize,
    journal: Vec<LinkAction>,
    sessions: Vec<DeviceSession>,
    published: Vec<(DeviceId, DeviceCommand)>,
    senders: HashMap<DeviceId, (usize, mpsc::Sender<LinkEvent>)>,
    open_failure: Option<String>,
    publish_failure: bool,
    disconnect_delay: Option<Duration>,
}

/// Link connector that records everything and never touches the network
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    // Read from the synchronous `status()` accessor
    statuses: Arc<StdMutex<HashMap<usize, (DeviceId, LinkStatus)>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` fails with `message`
    pub async fn fail_opens(&self, message: &str) {
        self.state.lock().await.open_failure = Some(message.to_string());
    }

    /// Every `publish` fails
    pub async fn fail_publishes(&self) {
        self.state.lock().await.publish_failure = true;
    }

    /// Every `disconnect` takes `delay` before the link reports closed
    pub async fn slow_disconnects(&self, delay: Duration) {
        self.state.lock().await.disconnect_delay = Some(delay);
    }

    pub async fn journal(&self) -> Vec<LinkAction> {
        self.state.lock().await.journal.clone()
    }

    pub async fn sessions(&self) -> Vec<DeviceSession> {
        self.state.lock().await.sessions.clone()
    }

    pub async fn published(&self, device_id: &DeviceId) -> Vec<DeviceCommand> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|(id, _)| id == device_id)
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Number of links for `device_id` currently reporting `CONNECTED`
    pub fn connected_links(&self, device_id: &DeviceId) -> usize {
        self.statuses
            .lock()
            .map(|statuses| {
                statuses
                    .values()
                    .filter(|(id, status)| id == device_id && *status == LinkStatus::Connected)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Set the status reported by the device's newest link
    pub async fn set_status(&self, device_id: &DeviceId, status: LinkStatus) {
        let state = self.state.lock().await;
        if let Some((index, _)) = state.senders.get(device_id) {
            if let Ok(mut statuses) = self.statuses.lock() {
                statuses.insert(*index, (device_id.clone(), status));
            }
        }
    }

    /// Deliver `event` as if the device's newest link produced it
    pub async fn inject(&self, device_id: &DeviceId, event: LinkEvent) -> bool {
        let sender = self
            .state
            .lock()
            .await
            .senders
            .get(device_id)
            .map(|(_, tx)| tx.clone());
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl LinkConnector for MockConnector {
    async fn open(
        &self,
        session: DeviceSession,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn DeviceTransport>, MqttError> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.open_failure {
            return Err(MqttError::InvalidOptions(message.clone()));
        }

        let index = state.next_link;
        state.next_link += 1;
        let device_id = session.device_id.clone();
        state.journal.push(LinkAction::Opened(device_id.clone(), index));
        state.sessions.push(session);
        state.senders.insert(device_id.clone(), (index, events));
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(index, (device_id.clone(), LinkStatus::Connected));
        }

        Ok(Box::new(MockLink {
            device_id,
            index,
            connector: self.clone(),
        }))
    }
}

/// Link handed out by [`MockConnector`]
pub struct MockLink {
    device_id: DeviceId,
    index: usize,
    connector: MockConnector,
}

#[async_trait]
impl DeviceTransport for MockLink {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    fn status(&self) -> LinkStatus {
        self.connector
            .statuses
            .lock()
            .ok()
            .and_then(|statuses| statuses.get(&self.index).map(|(_, status)| *status))
            .unwrap_or(LinkStatus::Disconnected)
    }

    async fn publish(&self, command: &DeviceCommand) -> Result<(), MqttError> {
        let mut state = self.connector.state.lock().await;
        if state.publish_failure {
            return Err(MqttError::PublishFailed(Box::new(std::io::Error::other(
                "mock publish failure",
            ))));
        }
        state.published.push((self.device_id.clone(), command.clone()));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let delay = self.connector.state.lock().await.disconnect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.connector.state.lock().await;
        state
            .journal
            .push(LinkAction::Closed(self.device_id.clone(), self.index));
        if state
            .senders
            .get(&self.device_id)
            .is_some_and(|(index, _)| *index == self.index)
        {
            state.senders.remove(&self.device_id);
        }
        if let Ok(mut statuses) = self.connector.statuses.lock() {
            statuses.insert(
                self.index,
                (self.device_id.clone(), LinkStatus::Disconnected),
            );
        }
        Ok(())
    }
}

/// Account service with canned answers
#[derive(Clone, Default)]
pub struct MockCloudAccount {
    token: Option<String>,
    uid: Option<u64>,
    firmware: Option<DeviceFirmware>,
    firmware_failure: Option<String>,
    sign_in_calls: Arc<Mutex<Vec<Region>>>,
}

impl MockCloudAccount {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..Default::default()
        }
    }

    /// Every sign-in is rejected
    pub fn rejecting() -> Self {
        Self::default()
    }

    /// Account uid behind the broker user; 1000 unless set
    pub fn with_uid(mut self, uid: u64) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_firmware(mut self, firmware: Value, ams: Value) -> Self {
        self.firmware = Some(DeviceFirmware { firmware, ams });
        self
    }

    pub fn with_firmware_failure(mut self, message: &str) -> Self {
        self.firmware_failure = Some(message.to_string());
        self
    }

    pub fn sign_in_calls(&self) -> Arc<Mutex<Vec<Region>>> {
        self.sign_in_calls.clone()
    }
}

#[async_trait]
impl CloudAccount for MockCloudAccount {
    async fn sign_in(
        &self,
        region: Region,
        _username: &str,
        _password: &str,
    ) -> Result<String, CloudError> {
        self.sign_in_calls.lock().await.push(region);
        self.token
            .clone()
            .ok_or_else(|| CloudError::AuthenticationFailed("mock rejects credentials".into()))
    }

    async fn broker_username(&self, _region: Region, _token: &str) -> Result<String, CloudError> {
        Ok(format!("u_{}", self.uid.unwrap_or(1000)))
    }

    async fn device_firmware(
        &self,
        _region: Region,
        _device_id: &DeviceId,
        _token: &str,
    ) -> Result<Option<DeviceFirmware>, CloudError> {
        if let Some(message) = &self.firmware_failure {
            return Err(CloudError::Unavailable {
                collaborator: "account",
                message: message.clone(),
            });
        }
        Ok(self.firmware.clone())
    }
}

/// Manifest service backed by an in-memory table
#[derive(Clone, Default)]
pub struct MockManifestService {
    entries: HashMap<DeviceFamily, Value>,
    failure: Option<String>,
}

impl MockManifestService {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_entry(family: DeviceFamily, firmware: Value) -> Self {
        Self::default().and_entry(family, firmware)
    }

    pub fn and_entry(mut self, family: DeviceFamily, firmware: Value) -> Self {
        self.entries.insert(family, firmware);
        self
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ManifestService for MockManifestService {
    async fn published_firmware(&self, family: DeviceFamily) -> Result<Option<Value>, CloudError> {
        if let Some(message) = &self.failure {
            return Err(CloudError::Unavailable {
                collaborator: "manifest",
                message: message.clone(),
            });
        }
        Ok(self.entries.get(&family).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSection;

    fn session(device_id: &str) -> DeviceSession {
        DeviceSession::lan(
            DeviceId::new(device_id),
            "10.0.0.2",
            "12345678",
            &DeviceSection::default(),
        )
    }

    #[tokio::test]
    async fn test_mock_link_records_lifecycle() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::channel(4);
        let mut link = connector.open(session("01S00A123456789"), tx).await.unwrap();
        let device = DeviceId::new("01S00A123456789");

        assert_eq!(link.status(), LinkStatus::Connected);
        link.publish(&DeviceCommand::Probe).await.unwrap();
        assert!(connector.inject(&device, LinkEvent::Connected { reconnect_count: 0 }).await);
        assert!(matches!(rx.recv().await, Some(LinkEvent::Connected { .. })));

        link.disconnect().await.unwrap();
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert_eq!(connector.published(&device).await, vec![DeviceCommand::Probe]);
        assert_eq!(
            connector.journal().await,
            vec![
                LinkAction::Opened(device.clone(), 0),
                LinkAction::Closed(device.clone(), 0)
            ]
        );
        assert!(!connector.inject(&device, LinkEvent::Connected { reconnect_count: 0 }).await);
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let connector = MockConnector::new();
        connector.fail_opens("broker down").await;
        let (tx, _rx) = mpsc::channel(1);
        assert!(connector.open(session("01S00A123456789"), tx).await.is_err());

        let manifest = MockManifestService::failing("HTTP 502");
        assert!(manifest.published_firmware(DeviceFamily::X1).await.is_err());

        let account = MockCloudAccount::rejecting();
        assert!(account.sign_in(Region::Com, "a@b.co", "pw").await.is_err());
    }
}
