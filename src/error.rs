//! Relay error taxonomy
//!
//! Transport failures are recovered inside the Device Link and malformed
//! reports are swallowed by the classifier; only validation and collaborator
//! failures ever reach a client, as one descriptive event sent to the requester.

use crate::cloud::CloudError;
use crate::config::ConfigError;
use crate::protocol::validation::{Field, ValidationError};
use crate::protocol::{DeviceId, ServerEvent};
use crate::transport::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Longest message ever sent to a client
pub const MAX_CLIENT_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|access_code|token|key|secret)[=:]\s*\S+").expect("secret pattern")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").expect("bearer pattern"));

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Malformed report: {message}")]
    MalformedMessage { message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{collaborator} unavailable: {message}")]
    CollaboratorUnavailable {
        collaborator: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{}", no_link_message(.device_id))]
    NoActiveLink { device_id: Option<DeviceId> },
}

fn no_link_message(device_id: &Option<DeviceId>) -> String {
    match device_id {
        Some(id) => format!("No active device link for {id}"),
        None => "No device attached to this connection; send a connect request first".to_string(),
    }
}

impl From<CloudError> for RelayError {
    fn from(err: CloudError) -> Self {
        RelayError::CollaboratorUnavailable {
            collaborator: err.collaborator().to_string(),
            message: err.to_string(),
        }
    }
}

impl RelayError {
    pub fn collaborator_unavailable<C: Into<String>, M: Into<String>>(
        collaborator: C,
        message: M,
    ) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// The single event reported back to the requesting client, if any
    pub fn to_client_event(&self) -> Option<ServerEvent> {
        match self {
            RelayError::Validation(e) => Some(ServerEvent::ValidationFailed {
                fields: e.fields().iter().map(|f| f.as_str().to_string()).collect(),
                message: sanitize_error_message(&e.to_string()),
            }),
            RelayError::NoActiveLink { .. } => Some(ServerEvent::ValidationFailed {
                fields: vec![Field::DeviceId.as_str().to_string()],
                message: sanitize_error_message(&self.to_string()),
            }),
            RelayError::CollaboratorUnavailable {
                collaborator,
                message,
            } => Some(ServerEvent::RelayFailure {
                source: collaborator.clone(),
                message: sanitize_error_message(message),
            }),
            RelayError::Transport(e) => Some(ServerEvent::RelayFailure {
                source: "device".to_string(),
                message: sanitize_error_message(&e.to_string()),
            }),
            RelayError::MalformedMessage { .. } | RelayError::Config(_) => None,
        }
    }
}

/// Redact secrets and cap length before a message leaves the process
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = BEARER_PATTERN
        .replace_all(&sanitized, "Bearer ***")
        .to_string();

    if sanitized.len() > MAX_CLIENT_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_CLIENT_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_fields() {
        let error = RelayError::from(ValidationError {
            failures: vec![
                (Field::Host, "bad".to_string()),
                (Field::AccessCode, "short".to_string()),
            ],
        });
        match error.to_client_event() {
            Some(ServerEvent::ValidationFailed { fields, message }) => {
                assert_eq!(fields, vec!["host", "access_code"]);
                assert!(message.contains("host"));
            }
            other => panic!("Expected validation event, got {other:?}"),
        }
    }

    #[test]
    fn test_collaborator_error_becomes_relay_failure() {
        let error = RelayError::collaborator_unavailable("manifest", "HTTP 502");
        assert_eq!(error.to_string(), "manifest unavailable: HTTP 502");
        assert_eq!(
            error.to_client_event(),
            Some(ServerEvent::RelayFailure {
                source: "manifest".to_string(),
                message: "HTTP 502".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_link_points_at_device_id() {
        let error = RelayError::NoActiveLink { device_id: None };
        match error.to_client_event() {
            Some(ServerEvent::ValidationFailed { fields, .. }) => {
                assert_eq!(fields, vec!["device_id"]);
            }
            other => panic!("Expected validation event, got {other:?}"),
        }

        let error = RelayError::NoActiveLink {
            device_id: Some(DeviceId::new("01S00A123456789")),
        };
        assert!(error.to_string().contains("01S00A123456789"));
    }

    #[test]
    fn test_malformed_reports_never_reach_clients() {
        assert_eq!(RelayError::malformed("bad json").to_client_event(), None);
    }

    #[test]
    fn test_sanitize_secrets() {
        let message = "sign-in failed: password=hunter2 token=abc456 access_code: 12345678";
        let sanitized = sanitize_error_message(message);
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc456"));
        assert!(!sanitized.contains("12345678"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_sanitize_bearer_token() {
        let sanitized = sanitize_error_message("401 for Authorization: Bearer eyJhbGciOi.x.y");
        assert!(!sanitized.contains("eyJhbGciOi"));
        assert!(sanitized.contains("Bearer ***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= MAX_CLIENT_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = "y".repeat(MAX_CLIENT_MESSAGE_LEN);
        assert_eq!(sanitize_error_message(&exact), exact);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= MAX_CLIENT_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }
}
