//! Pure connection configuration for the device broker
//!
//! Broker options, TLS setup and topic construction. Nothing in here touches
//! the network.

use crate::config::DeviceSection;
use crate::protocol::DeviceId;
use crate::transport::DeviceSession;
use rumqttc::tokio_rustls::rustls;
use rumqttc::{MqttOptions, TlsConfiguration, Transport as RumqttcTransport};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use thiserror::Error;

/// Device transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker options: {0}")]
    InvalidOptions(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
}

/// Build broker options for a device session
pub fn configure_mqtt_options(
    session: &DeviceSession,
    device: &DeviceSection,
) -> Result<MqttOptions, MqttError> {
    if session.host.trim().is_empty() {
        return Err(MqttError::InvalidOptions("broker host is empty".to_string()));
    }
    if session.port == 0 {
        return Err(MqttError::InvalidOptions("broker port is zero".to_string()));
    }

    // Unique per link so a superseded session never collides with its replacement
    let client_id = format!(
        "printer-relay-{}-{}",
        session.device_id,
        chrono::Utc::now().timestamp_millis()
    );
    let mut options = MqttOptions::new(client_id, session.host.clone(), session.port);
    options.set_credentials(session.username.clone(), session.credential.clone());
    options.set_keep_alive(device.keep_alive());
    options.set_max_packet_size(device.max_packet_size, device.max_packet_size);

    if session.tls {
        options.set_transport(tls_transport(session.verify_certificates));
    }

    Ok(options)
}

fn tls_transport(verify_certificates: bool) -> RumqttcTransport {
    if verify_certificates {
        return RumqttcTransport::tls_with_default_config();
    }

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    RumqttcTransport::tls_with_config(TlsConfiguration::Rustls(Arc::new(config)))
}

/// Printers serve a self-signed certificate that no public root vouches for.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}

/// Device topic construction
pub struct TopicBuilder;

impl TopicBuilder {
    /// Device-to-relay telemetry: `device/{id}/report`
    pub fn report_topic(device_id: &DeviceId) -> String {
        format!("device/{device_id}/report")
    }

    /// Relay-to-device commands: `device/{id}/request`
    pub fn request_topic(device_id: &DeviceId) -> String {
        format!("device/{device_id}/request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DeviceSession {
        DeviceSession::lan(
            DeviceId::new("01S00A123456789"),
            "192.168.1.20",
            "12345678",
            &DeviceSection::default(),
        )
    }

    #[test]
    fn test_topic_construction() {
        let id = DeviceId::new("01S00A123456789");
        assert_eq!(TopicBuilder::report_topic(&id), "device/01S00A123456789/report");
        assert_eq!(TopicBuilder::request_topic(&id), "device/01S00A123456789/request");
    }

    #[test]
    fn test_configure_plain_options() {
        let mut session = session();
        session.tls = false;
        let options = configure_mqtt_options(&session, &DeviceSection::default()).unwrap();
        assert_eq!(options.broker_address(), ("192.168.1.20".to_string(), 8883));
        assert_eq!(
            options.credentials(),
            Some(("bblp".to_string(), "12345678".to_string()))
        );
        assert!(options.client_id().starts_with("printer-relay-01S00A123456789-"));
        assert!(matches!(options.transport(), RumqttcTransport::Tcp));
    }

    #[test]
    fn test_configure_tls_without_verification() {
        let options = configure_mqtt_options(&session(), &DeviceSection::default()).unwrap();
        assert!(matches!(options.transport(), RumqttcTransport::Tls(_)));
    }

    #[test]
    fn test_transport_follows_session_not_device_section() {
        // A plaintext LAN section must not downgrade a cloud session
        let device = DeviceSection {
            tls: false,
            ..DeviceSection::default()
        };
        let mut session = session();
        session.tls = true;
        let options = configure_mqtt_options(&session, &device).unwrap();
        assert!(matches!(options.transport(), RumqttcTransport::Tls(_)));
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let mut session = session();
        session.host = " ".to_string();
        let result = configure_mqtt_options(&session, &DeviceSection::default());
        assert!(matches!(result, Err(MqttError::InvalidOptions(_))));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::InvalidOptions("test".to_string()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SerializationError(serde_json::from_str::<u8>("x").unwrap_err()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
