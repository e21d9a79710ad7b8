//! Device transport layer
//!
//! A Device Link owns the broker session for one printer. The session manager
//! only talks to links through [`DeviceTransport`] and creates them through a
//! [`LinkConnector`], so tests can swap the MQTT implementation for mocks.

use crate::cloud::CloudLogin;
use crate::config::{DeviceSection, RegionSection};
use crate::protocol::{DeviceCommand, DeviceId, ReportMessage};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::{MqttConnector, MqttError};

/// Broker coordinates and shared secret for one device
#[derive(Clone, PartialEq)]
pub struct DeviceSession {
    pub device_id: DeviceId,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// LAN access code or cloud bearer token
    pub credential: String,
    pub tls: bool,
    pub verify_certificates: bool,
}

impl DeviceSession {
    /// Session against the printer's own broker on the local network
    pub fn lan(device_id: DeviceId, host: &str, access_code: &str, device: &DeviceSection) -> Self {
        Self {
            device_id,
            host: host.to_string(),
            port: device.broker_port,
            username: device.username.clone(),
            credential: access_code.to_string(),
            tls: device.tls,
            verify_certificates: device.verify_certificates,
        }
    }

    /// Session against a region's cloud broker as the signed-in account
    ///
    /// The cloud broker presents a publicly trusted certificate, so TLS and
    /// verification are always on regardless of the LAN settings.
    pub fn cloud(
        device_id: DeviceId,
        region: &RegionSection,
        login: &CloudLogin,
        device: &DeviceSection,
    ) -> Self {
        Self {
            device_id,
            host: region.broker_host.clone(),
            port: device.broker_port,
            username: login.broker_username.clone(),
            credential: login.token.clone(),
            tls: true,
            verify_certificates: true,
        }
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("credential", &"***")
            .field("tls", &self.tls)
            .field("verify_certificates", &self.verify_certificates)
            .finish()
    }
}

/// Connection status of a Device Link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "DISCONNECTED",
            LinkStatus::Connecting => "CONNECTING",
            LinkStatus::Connected => "CONNECTED",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a Device Link hands to the classifier task, in broker order
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Broker handshake completed; carries the failed attempts since the last success
    Connected { reconnect_count: u32 },
    /// First transport error of a reconnect storm
    ConnectFailed { reason: String },
    Report(ReportMessage),
}

/// Transport trait for a live device link
///
/// Implementations publish fire-and-forget: `Ok` means the command was handed
/// to the broker client, not that the device acted on it.
#[async_trait::async_trait]
pub trait DeviceTransport: Send + Sync {
    fn device_id(&self) -> &DeviceId;

    fn status(&self) -> LinkStatus;

    async fn publish(&self, command: &DeviceCommand) -> Result<(), MqttError>;

    /// Unsubscribe, disconnect and stop the reconnect loop
    async fn disconnect(&mut self) -> Result<(), MqttError>;
}

/// Factory for Device Links
#[async_trait::async_trait]
pub trait LinkConnector: Send + Sync {
    /// Start a link for `session`; its events are delivered on `events`
    async fn open(
        &self,
        session: DeviceSession,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn DeviceTransport>, MqttError>;
}
