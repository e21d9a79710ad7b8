//! reqwest implementations of the cloud collaborators

use super::{CloudAccount, CloudError, DeviceFirmware, ManifestService, Region};
use crate::config::CloudSection;
use crate::protocol::{DeviceFamily, DeviceId};
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const TOKEN_COOKIE: &str = "token=";

fn build_client(cloud: &CloudSection, collaborator: &'static str) -> Result<Client, CloudError> {
    Client::builder()
        .timeout(cloud.timeout())
        .build()
        .map_err(|e| CloudError::Unavailable {
            collaborator,
            message: e.to_string(),
        })
}

fn unavailable(collaborator: &'static str) -> impl Fn(reqwest::Error) -> CloudError {
    move |e| CloudError::Unavailable {
        collaborator,
        message: e.without_url().to_string(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInForm<'a> {
    account: &'a str,
    password: &'a str,
    api_error: &'a str,
}

/// Account web API client
pub struct HttpCloudAccount {
    client: Client,
    cloud: CloudSection,
}

impl HttpCloudAccount {
    pub fn new(cloud: &CloudSection) -> Result<Self, CloudError> {
        Ok(Self {
            client: build_client(cloud, "auth")?,
            cloud: cloud.clone(),
        })
    }
}

#[async_trait]
impl CloudAccount for HttpCloudAccount {
    async fn sign_in(
        &self,
        region: Region,
        username: &str,
        password: &str,
    ) -> Result<String, CloudError> {
        let url = format!("{}/api/sign-in/form", region.section(&self.cloud).api_base);
        let response = self
            .client
            .post(url)
            .json(&SignInForm {
                account: username,
                password,
                api_error: "",
            })
            .send()
            .await
            .map_err(unavailable("auth"))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(CloudError::AuthenticationFailed(format!(
                "account service answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(CloudError::Unavailable {
                collaborator: "auth",
                message: format!("account service answered {status}"),
            });
        }

        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|cookie| cookie.split(';').next())
            .find_map(|pair| pair.trim().strip_prefix(TOKEN_COOKIE))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::AuthenticationFailed("sign-in response carried no token cookie".into())
            })
    }

    async fn broker_username(&self, region: Region, token: &str) -> Result<String, CloudError> {
        let url = format!(
            "{}/v1/design-user-service/my/preference",
            region.section(&self.cloud).api_base
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(unavailable("account"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Unavailable {
                collaborator: "account",
                message: format!("account preference lookup answered {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| CloudError::UnexpectedResponse {
            collaborator: "account",
            message: e.without_url().to_string(),
        })?;
        broker_user(&body).ok_or_else(|| CloudError::UnexpectedResponse {
            collaborator: "account",
            message: "account preference carried no uid".to_string(),
        })
    }

    async fn device_firmware(
        &self,
        region: Region,
        device_id: &DeviceId,
        token: &str,
    ) -> Result<Option<DeviceFirmware>, CloudError> {
        let url = format!(
            "{}/api/v1/iot-service/api/user/device/version",
            region.section(&self.cloud).api_base
        );
        let response = self
            .client
            .get(url)
            .query(&[("dev_id", device_id.as_str())])
            .bearer_auth(token)
            .send()
            .await
            .map_err(unavailable("account"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Unavailable {
                collaborator: "account",
                message: format!("device version lookup answered {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| CloudError::UnexpectedResponse {
            collaborator: "account",
            message: e.without_url().to_string(),
        })?;

        let Some(device) = body.get("devices").and_then(|d| d.get(0)) else {
            return Ok(None);
        };
        let firmware = device
            .get("firmware")
            .and_then(|f| f.get(0))
            .cloned()
            .ok_or_else(|| CloudError::UnexpectedResponse {
                collaborator: "account",
                message: "device entry has no firmware list".to_string(),
            })?;
        debug!(device_id = %device_id, firmware = %firmware, "Fetched cloud firmware");

        Ok(Some(DeviceFirmware {
            firmware,
            ams: device.get("ams").cloned().unwrap_or(Value::Null),
        }))
    }
}

/// `u_<uid>` from an account preference body; the uid may be a number or a string
fn broker_user(body: &Value) -> Option<String> {
    let uid = match body.get("uid")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) if !s.is_empty() => s.clone(),
        _ => return None,
    };
    Some(format!("u_{uid}"))
}

/// Published manifest fetched over HTTP
pub struct HttpManifestService {
    client: Client,
    url: String,
}

impl HttpManifestService {
    pub fn new(cloud: &CloudSection) -> Result<Self, CloudError> {
        Ok(Self {
            client: build_client(cloud, "manifest")?,
            url: cloud.manifest_url.clone(),
        })
    }
}

#[async_trait]
impl ManifestService for HttpManifestService {
    async fn published_firmware(&self, family: DeviceFamily) -> Result<Option<Value>, CloudError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(unavailable("manifest"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Unavailable {
                collaborator: "manifest",
                message: format!("manifest fetch answered {status}"),
            });
        }

        let manifest: Value = response.json().await.map_err(|e| CloudError::UnexpectedResponse {
            collaborator: "manifest",
            message: e.without_url().to_string(),
        })?;
        let slots = manifest
            .as_array()
            .ok_or_else(|| CloudError::UnexpectedResponse {
                collaborator: "manifest",
                message: "manifest is not an array".to_string(),
            })?;

        Ok(slots
            .get(family.manifest_slot())
            .and_then(|slot| slot.pointer("/upgrade/firmware_optional/firmware"))
            .filter(|firmware| !firmware.is_null())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_form_field_names() {
        let form = SignInForm {
            account: "maker@example.com",
            password: "pw",
            api_error: "",
        };
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["account"], "maker@example.com");
        assert_eq!(json["apiError"], "");
    }

    #[test]
    fn test_broker_user_from_uid() {
        assert_eq!(broker_user(&serde_json::json!({"uid": 1843762})).as_deref(), Some("u_1843762"));
        assert_eq!(broker_user(&serde_json::json!({"uid": "42"})).as_deref(), Some("u_42"));
        assert_eq!(broker_user(&serde_json::json!({"uid": ""})), None);
        assert_eq!(broker_user(&serde_json::json!({"name": "maker"})), None);
    }

    #[test]
    fn test_clients_build_from_defaults() {
        let cloud = CloudSection::default();
        assert!(HttpCloudAccount::new(&cloud).is_ok());
        assert!(HttpManifestService::new(&cloud).is_ok());
    }
}
