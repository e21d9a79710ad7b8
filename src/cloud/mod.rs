//! Cloud collaborators
//!
//! The account service exchanges credentials for a bearer token and reports the
//! firmware the cloud holds for a device; the manifest service returns the
//! firmware descriptor currently published for a device family. The relay only
//! consumes their results: a token and per-account user for the cloud broker,
//! and a comparison message for the browser.

pub mod compare;
pub mod http;

use crate::config::{CloudSection, RegionSection};
use crate::observability::mask_secret;
use crate::protocol::validation::{is_cn_phone, is_email};
use crate::protocol::{CredentialsRequest, DeviceFamily, DeviceId, ServerEvent, UpgradeState};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use compare::{compare_versions, is_newer};
pub use http::{HttpCloudAccount, HttpManifestService};

/// Sent when the cloud holds firmware newer than the published manifest
pub const REPOSITORY_BEHIND_MESSAGE: &str =
    "Check repository version! Thank you for the update information.";

/// Sent when the published manifest is already current
pub const REPOSITORY_CURRENT_MESSAGE: &str =
    "Check repository version! It's already the latest version. Thank you";

/// Collaborator failures
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("Sign-in rejected: {0}")]
    AuthenticationFailed(String),

    #[error("{collaborator} request failed: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
    },

    #[error("Unexpected {collaborator} response: {message}")]
    UnexpectedResponse {
        collaborator: &'static str,
        message: String,
    },
}

impl CloudError {
    /// Name of the collaborator that failed, as reported to clients
    pub fn collaborator(&self) -> &'static str {
        match self {
            CloudError::AuthenticationFailed(_) => "auth",
            CloudError::Unavailable { collaborator, .. }
            | CloudError::UnexpectedResponse { collaborator, .. } => collaborator,
        }
    }
}

/// Account region, chosen from the shape of the username
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Global service, e-mail sign-in
    Com,
    /// Mainland China service, phone number sign-in
    Cn,
}

impl Region {
    pub fn detect(username: &str) -> Option<Self> {
        if is_email(username) {
            Some(Region::Com)
        } else if is_cn_phone(username) {
            Some(Region::Cn)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Com => "com",
            Region::Cn => "cn",
        }
    }

    pub fn section(self, cloud: &CloudSection) -> &RegionSection {
        match self {
            Region::Com => &cloud.com,
            Region::Cn => &cloud.cn,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firmware the cloud reports for one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFirmware {
    /// First entry of the device's firmware list
    pub firmware: Value,
    /// AMS unit firmware, passed through untouched
    pub ams: Value,
}

impl DeviceFirmware {
    pub fn version(&self) -> Option<&str> {
        self.firmware.get("version").and_then(Value::as_str)
    }
}

/// Authentication service
#[async_trait]
pub trait CloudAccount: Send + Sync {
    /// Exchange credentials for a bearer token
    async fn sign_in(
        &self,
        region: Region,
        username: &str,
        password: &str,
    ) -> Result<String, CloudError>;

    /// Cloud broker user name for the signed-in account, `u_<uid>`
    async fn broker_username(&self, region: Region, token: &str) -> Result<String, CloudError>;

    /// Firmware the cloud holds for `device_id`; `None` when the account has no such device
    async fn device_firmware(
        &self,
        region: Region,
        device_id: &DeviceId,
        token: &str,
    ) -> Result<Option<DeviceFirmware>, CloudError>;
}

/// Firmware manifest service
#[async_trait]
pub trait ManifestService: Send + Sync {
    /// Published firmware descriptor for `family`; `None` when the manifest has no entry
    async fn published_firmware(&self, family: DeviceFamily) -> Result<Option<Value>, CloudError>;
}

/// Successful cloud sign-in
#[derive(Clone)]
pub struct CloudLogin {
    pub region: Region,
    pub token: String,
    /// Broker user the token authenticates as
    pub broker_username: String,
}

impl fmt::Debug for CloudLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudLogin")
            .field("region", &self.region)
            .field("token", &mask_secret(&self.token))
            .field("broker_username", &self.broker_username)
            .finish()
    }
}

/// Orchestrates the collaborators for a credentials connect request
#[derive(Clone)]
pub struct CloudGateway {
    account: Arc<dyn CloudAccount>,
    manifest: Arc<dyn ManifestService>,
    cloud: CloudSection,
}

impl CloudGateway {
    pub fn new(
        account: Arc<dyn CloudAccount>,
        manifest: Arc<dyn ManifestService>,
        cloud: CloudSection,
    ) -> Self {
        Self {
            account,
            manifest,
            cloud,
        }
    }

    /// Gateway backed by the real HTTP services
    pub fn from_config(cloud: &CloudSection) -> Result<Self, CloudError> {
        Ok(Self::new(
            Arc::new(HttpCloudAccount::new(cloud)?),
            Arc::new(HttpManifestService::new(cloud)?),
            cloud.clone(),
        ))
    }

    pub fn region_section(&self, region: Region) -> &RegionSection {
        region.section(&self.cloud)
    }

    /// Sign in with the region implied by the username
    pub async fn sign_in(&self, request: &CredentialsRequest) -> Result<CloudLogin, CloudError> {
        let region = Region::detect(&request.username).ok_or_else(|| {
            CloudError::AuthenticationFailed(
                "username is neither an e-mail address nor a phone number".to_string(),
            )
        })?;

        let token = self
            .account
            .sign_in(region, &request.username, &request.password)
            .await?;
        let broker_username = self.account.broker_username(region, &token).await?;
        info!(
            region = %region,
            token = %mask_secret(&token),
            broker_username = %broker_username,
            "Cloud sign-in succeeded"
        );

        Ok(CloudLogin {
            region,
            token,
            broker_username,
        })
    }

    /// Compare the cloud's firmware for `device_id` against the published manifest
    ///
    /// Yields the repository comparison message followed by the firmware
    /// banner. Devices the account does not list, families without a manifest
    /// slot and empty manifest slots yield nothing.
    pub async fn compare_firmware(
        &self,
        device_id: &DeviceId,
        login: &CloudLogin,
    ) -> Result<Vec<ServerEvent>, CloudError> {
        let Some(cloud_firmware) = self
            .account
            .device_firmware(login.region, device_id, &login.token)
            .await?
        else {
            debug!(device_id = %device_id, "Account lists no firmware for device");
            return Ok(Vec::new());
        };

        let Some(family) = device_id.family() else {
            debug!(device_id = %device_id, "Device family has no manifest slot");
            return Ok(Vec::new());
        };

        let Some(published) = self.manifest.published_firmware(family).await? else {
            debug!(device_id = %device_id, "Manifest has no entry for device family");
            return Ok(Vec::new());
        };

        let cloud_version = cloud_firmware
            .version()
            .ok_or_else(|| CloudError::UnexpectedResponse {
                collaborator: "account",
                message: "device firmware has no version".to_string(),
            })?;
        let published_version = published
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| CloudError::UnexpectedResponse {
                collaborator: "manifest",
                message: "published firmware has no version".to_string(),
            })?;

        let message = if is_newer(cloud_version, published_version) {
            REPOSITORY_BEHIND_MESSAGE
        } else {
            REPOSITORY_CURRENT_MESSAGE
        };
        info!(
            device_id = %device_id,
            published = published_version,
            cloud = cloud_version,
            "Compared published firmware with cloud firmware"
        );

        Ok(vec![
            ServerEvent::RepositoryComparison {
                message: message.to_string(),
            },
            ServerEvent::FirmwareBanner(UpgradeState::new(published_version, cloud_version)),
        ])
    }
}
