//! Inbound browser client messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message received from a browser client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attach to a device, either through the cloud account or directly on the LAN
    Connect(ConnectRequest),
    /// Forward a firmware descriptor to the attached device
    ShouldUpgrade(Value),
    /// Re-send the probe sequence to the attached device
    Refresh {},
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Connect(ConnectRequest::Credentials(_)) => "connect_by_credentials",
            ClientMessage::Connect(ConnectRequest::Coordinates(_)) => "connect_by_coordinates",
            ClientMessage::ShouldUpgrade(_) => "apply_upgrade",
            ClientMessage::Refresh {} => "refresh",
        }
    }
}

/// The two connect request shapes, told apart by their field names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectRequest {
    Credentials(CredentialsRequest),
    Coordinates(CoordinatesRequest),
}

impl ConnectRequest {
    pub fn device_id(&self) -> &str {
        match self {
            ConnectRequest::Credentials(request) => &request.device_id,
            ConnectRequest::Coordinates(request) => &request.device_id,
        }
    }
}

/// Cloud account sign-in
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
    pub device_id: String,
}

impl std::fmt::Debug for CredentialsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsRequest")
            .field("username", &self.username)
            .field("password", &"***")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Direct LAN connection to the printer's broker
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatesRequest {
    pub host: String,
    pub access_code: String,
    pub device_id: String,
}

impl std::fmt::Debug for CoordinatesRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatesRequest")
            .field("host", &self.host)
            .field("access_code", &"***")
            .field("device_id", &self.device_id)
            .finish()
    }
}
