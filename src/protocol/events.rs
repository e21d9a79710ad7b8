//! Normalized events and their browser wire form
//!
//! [`NormalizedEvent`] is everything the upgrade state machine and the device
//! link produce. [`ServerEvent`] adds the events relayed from the cloud
//! collaborators and the per-client error replies. Serialization keeps the
//! single-key object shape the browser client dispatches on.

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Version placeholder used when no candidate version is known yet
pub const UNKNOWN_VERSION: &str = "-";

/// Current and candidate firmware version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeState {
    #[serde(rename = "cur_ver")]
    pub current_version: String,
    #[serde(rename = "new_ver")]
    pub target_version: String,
}

impl UpgradeState {
    pub fn new<C: Into<String>, T: Into<String>>(current: C, target: T) -> Self {
        Self {
            current_version: current.into(),
            target_version: target.into(),
        }
    }
}

/// Upgrade status reported by the device in its progress section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpgradeStatus {
    Success,
    Failed,
    Downloading,
    Flashing,
    Other(String),
}

impl UpgradeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UpgradeStatus::Success => "UPGRADE_SUCCESS",
            UpgradeStatus::Failed => "UPGRADE_FAIL",
            UpgradeStatus::Downloading => "DOWNLOADING",
            UpgradeStatus::Flashing => "FLASHING",
            UpgradeStatus::Other(raw) => raw,
        }
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, UpgradeStatus::Success)
    }
}

impl From<String> for UpgradeStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "UPGRADE_SUCCESS" => UpgradeStatus::Success,
            "UPGRADE_FAIL" => UpgradeStatus::Failed,
            "DOWNLOADING" => UpgradeStatus::Downloading,
            "FLASHING" => UpgradeStatus::Flashing,
            _ => UpgradeStatus::Other(raw),
        }
    }
}

impl From<UpgradeStatus> for String {
    fn from(status: UpgradeStatus) -> Self {
        match status {
            UpgradeStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress report from a running upgrade
///
/// Serializes as `section`, the device's `upgrade_state` object exactly as
/// received. The typed fields are read from it for success detection and logs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateProgress {
    pub progress_percent: Option<u8>,
    pub status: Option<UpgradeStatus>,
    pub message: Option<String>,
    pub module_name: Option<String>,
    pub section: Map<String, Value>,
}

impl Serialize for UpdateProgress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.section.serialize(serializer)
    }
}

/// Upgrade history/manifest blob reported by the device, passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerSnapshot(pub Value);

/// Classified, UI-agnostic device event
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    Connected { reconnect_count: u32 },
    ConnectFailed { reason: String },
    UpgradeStateAnnounced(UpgradeState),
    ProgressUpdated(UpdateProgress),
    ManagerSnapshotReceived(ManagerSnapshot),
}

impl NormalizedEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedEvent::Connected { .. } => "connected",
            NormalizedEvent::ConnectFailed { .. } => "connect_failed",
            NormalizedEvent::UpgradeStateAnnounced(_) => "upgrade_state",
            NormalizedEvent::ProgressUpdated(_) => "updating_state",
            NormalizedEvent::ManagerSnapshotReceived(_) => "upgrade_manager",
        }
    }
}

/// Everything the server ever writes to a browser client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Device(NormalizedEvent),
    /// Published-vs-cloud firmware comparison outcome
    RepositoryComparison { message: String },
    /// Published firmware (current) vs. the cloud's firmware (candidate)
    FirmwareBanner(UpgradeState),
    /// Connect request rejected at the boundary; sent to the requester only
    ValidationFailed { fields: Vec<String>, message: String },
    /// A collaborator or device hand-off failed; sent to the requester only
    RelayFailure { source: String, message: String },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Device(event) => event.kind(),
            ServerEvent::RepositoryComparison { .. } => "repository_upgrade",
            ServerEvent::FirmwareBanner(_) => "firmware_banner",
            ServerEvent::ValidationFailed { .. } => "validation_error",
            ServerEvent::RelayFailure { .. } => "relay_error",
        }
    }

    /// JSON object sent over the socket
    pub fn to_wire(&self) -> Value {
        match self {
            ServerEvent::Device(NormalizedEvent::Connected { reconnect_count }) => {
                json!({ "connect": true, "count": reconnect_count })
            }
            ServerEvent::Device(NormalizedEvent::ConnectFailed { reason }) => {
                json!({ "connect": false, "error": reason })
            }
            ServerEvent::Device(NormalizedEvent::UpgradeStateAnnounced(state)) => {
                json!({ "upgrade_state": state })
            }
            ServerEvent::Device(NormalizedEvent::ProgressUpdated(progress)) => {
                json!({ "updating_state": progress })
            }
            ServerEvent::Device(NormalizedEvent::ManagerSnapshotReceived(snapshot)) => {
                json!({ "upgrade_manager": snapshot })
            }
            ServerEvent::RepositoryComparison { message } => {
                json!({ "repository_upgrade": message })
            }
            ServerEvent::FirmwareBanner(state) => json!({ "firmware_banner": state }),
            ServerEvent::ValidationFailed { fields, message } => {
                json!({ "validation_error": { "fields": fields, "message": message } })
            }
            ServerEvent::RelayFailure { source, message } => {
                json!({ "relay_error": { "source": source, "message": message } })
            }
        }
    }
}

impl Serialize for ServerEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl From<NormalizedEvent> for ServerEvent {
    fn from(event: NormalizedEvent) -> Self {
        ServerEvent::Device(event)
    }
}
