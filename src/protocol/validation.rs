//! Boundary validation for connect requests
//!
//! Every connect request is checked here before it reaches the session manager.
//! All failing fields are collected into a single [`ValidationError`].

use super::client::{ConnectRequest, CoordinatesRequest, CredentialsRequest};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Length of the LAN access code shown on the printer screen
pub const ACCESS_CODE_LEN: usize = 8;

static DEVICE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(00[MW]|03W|01[SPT]|030|039)[A-Za-z0-9]{12}$").expect("device id pattern")
});

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern")
});

static CN_PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\+\d{2,3}\s*)?(\d{11})$").expect("phone pattern"));

/// Connect request field names, as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Host,
    AccessCode,
    DeviceId,
    Username,
    Password,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Host => "host",
            Field::AccessCode => "access_code",
            Field::DeviceId => "device_id",
            Field::Username => "username",
            Field::Password => "password",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One or more connect request fields failed validation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid connect request: {}", describe(.failures))]
pub struct ValidationError {
    pub failures: Vec<(Field, String)>,
}

fn describe(failures: &[(Field, String)]) -> String {
    failures
        .iter()
        .map(|(field, reason)| format!("{field} {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: Field, reason: impl Into<String>) -> Self {
        Self {
            failures: vec![(field, reason.into())],
        }
    }

    pub fn fields(&self) -> Vec<Field> {
        self.failures.iter().map(|(field, _)| *field).collect()
    }

    pub fn names(&self, field: Field) -> bool {
        self.failures.iter().any(|(f, _)| *f == field)
    }
}

/// Validate a connect request of either shape
pub fn validate_connect(request: &ConnectRequest) -> Result<(), ValidationError> {
    match request {
        ConnectRequest::Coordinates(request) => validate_coordinates(request),
        ConnectRequest::Credentials(request) => validate_credentials(request),
    }
}

pub fn validate_coordinates(request: &CoordinatesRequest) -> Result<(), ValidationError> {
    let mut failures = Vec::new();

    if request.host.parse::<IpAddr>().is_err() {
        failures.push((
            Field::Host,
            format!("'{}' is not a valid IPv4 or IPv6 address", request.host),
        ));
    }
    let code_len = request.access_code.chars().count();
    if code_len != ACCESS_CODE_LEN {
        failures.push((
            Field::AccessCode,
            format!("must be exactly {ACCESS_CODE_LEN} characters, got {code_len}"),
        ));
    }
    check_device_id(&request.device_id, &mut failures);

    finish(failures)
}

pub fn validate_credentials(request: &CredentialsRequest) -> Result<(), ValidationError> {
    let mut failures = Vec::new();

    if !is_email(&request.username) && !is_cn_phone(&request.username) {
        failures.push((
            Field::Username,
            "must be an e-mail address or a mainland China phone number".to_string(),
        ));
    }
    if request.password.is_empty() {
        failures.push((Field::Password, "must not be empty".to_string()));
    }
    check_device_id(&request.device_id, &mut failures);

    finish(failures)
}

pub fn is_valid_device_id(device_id: &str) -> bool {
    DEVICE_ID_PATTERN.is_match(device_id)
}

pub fn is_email(username: &str) -> bool {
    EMAIL_PATTERN.is_match(username)
}

pub fn is_cn_phone(username: &str) -> bool {
    CN_PHONE_PATTERN.is_match(username)
}

fn check_device_id(device_id: &str, failures: &mut Vec<(Field, String)>) {
    if !is_valid_device_id(device_id) {
        failures.push((
            Field::DeviceId,
            format!("'{device_id}' is not a recognized printer serial number"),
        ));
    }
}

fn finish(failures: Vec<(Field, String)>) -> Result<(), ValidationError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coordinates(host: &str, code: &str, device_id: &str) -> CoordinatesRequest {
        CoordinatesRequest {
            host: host.to_string(),
            access_code: code.to_string(),
            device_id: device_id.to_string(),
        }
    }

    #[test]
    fn test_valid_coordinates() {
        assert!(validate_coordinates(&coordinates("192.168.0.10", "12345678", "01S00A123456789")).is_ok());
        assert!(validate_coordinates(&coordinates("fe80::1", "abcdEFGH", "03900A123456789")).is_ok());
    }

    #[test]
    fn test_bad_host_and_short_code_name_both_fields() {
        let err = validate_coordinates(&coordinates("999.1.1.1", "1234567", "01Sabcdefghijkl"))
            .unwrap_err();
        assert_eq!(err.fields(), vec![Field::Host, Field::AccessCode]);
        let message = err.to_string();
        assert!(message.contains("host"));
        assert!(message.contains("access_code"));
    }

    #[test]
    fn test_hostname_is_not_an_address() {
        let err = validate_coordinates(&coordinates("printer.local", "12345678", "01S00A123456789"))
            .unwrap_err();
        assert!(err.names(Field::Host));
    }

    #[test]
    fn test_device_id_prefixes() {
        for prefix in ["00M", "00W", "03W", "01S", "01P", "01T", "030", "039"] {
            let id = format!("{prefix}ABCDEF123456");
            assert!(is_valid_device_id(&id), "{id} should be valid");
        }
        assert!(!is_valid_device_id("02SABCDEF123456"));
        assert!(!is_valid_device_id("01SABCDEF12345"));
        assert!(!is_valid_device_id("01SABCDEF1234567"));
        assert!(!is_valid_device_id("01SABCDEF12345-"));
    }

    #[test]
    fn test_credentials_username_forms() {
        let mut request = CredentialsRequest {
            username: "maker@example.com".to_string(),
            password: "secret".to_string(),
            device_id: "01P00A123456789".to_string(),
        };
        assert!(validate_credentials(&request).is_ok());

        request.username = "+86 13800138000".to_string();
        assert!(validate_credentials(&request).is_ok());

        request.username = "not-a-user".to_string();
        request.password = String::new();
        let err = validate_credentials(&request).unwrap_err();
        assert_eq!(err.fields(), vec![Field::Username, Field::Password]);
    }

    proptest! {
        #[test]
        fn access_code_length_other_than_eight_is_rejected(code in "[a-zA-Z0-9]{0,16}") {
            let result = validate_coordinates(&coordinates("10.0.0.1", &code, "01S00A123456789"));
            prop_assert_eq!(result.is_ok(), code.len() == ACCESS_CODE_LEN);
        }
    }
}
