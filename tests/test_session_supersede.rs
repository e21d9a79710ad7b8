//! Session manager behavior across links: supersede, concurrency and collaborator warnings

use printer_relay::cloud::CloudGateway;
use printer_relay::config::{CloudSection, DeviceSection};
use printer_relay::protocol::{
    ConnectRequest, CoordinatesRequest, CredentialsRequest, DeviceFamily, DeviceId,
};
use printer_relay::testing::mocks::{
    LinkAction, MockCloudAccount, MockConnector, MockManifestService,
};
use printer_relay::transport::{LinkEvent, LinkStatus};
use printer_relay::{Broadcaster, RelayError, SessionManager};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DEVICE: &str = "01S00A123456789";

fn manager(
    connector: &MockConnector,
    account: MockCloudAccount,
    manifest: MockManifestService,
) -> (Arc<SessionManager>, Arc<Broadcaster>) {
    let broadcaster = Arc::new(Broadcaster::new(16));
    let gateway = CloudGateway::new(Arc::new(account), Arc::new(manifest), CloudSection::default());
    let sessions = Arc::new(SessionManager::new(
        Arc::new(connector.clone()),
        gateway,
        broadcaster.clone(),
        DeviceSection::default(),
    ));
    (sessions, broadcaster)
}

fn lan(host: &str) -> ConnectRequest {
    ConnectRequest::Coordinates(CoordinatesRequest {
        host: host.to_string(),
        access_code: "12345678".to_string(),
        device_id: DEVICE.to_string(),
    })
}

fn credentials() -> ConnectRequest {
    ConnectRequest::Credentials(CredentialsRequest {
        username: "maker@example.com".to_string(),
        password: "pw".to_string(),
        device_id: DEVICE.to_string(),
    })
}

#[tokio::test]
async fn test_concurrent_connects_leave_one_live_link() {
    let connector = MockConnector::new();
    let (sessions, _) = manager(
        &connector,
        MockCloudAccount::with_token("tok"),
        MockManifestService::empty(),
    );

    let first = lan("192.168.1.20");
    let second = lan("192.168.1.21");
    let (a, b) = tokio::join!(sessions.connect(&first), sessions.connect(&second));
    a.unwrap();
    b.unwrap();

    let device = DeviceId::new(DEVICE);
    let journal = connector.journal().await;
    let opened = journal
        .iter()
        .filter(|action| matches!(action, LinkAction::Opened(..)))
        .count();
    let closed = journal
        .iter()
        .filter(|action| matches!(action, LinkAction::Closed(..)))
        .count();
    assert_eq!(opened, 2);
    assert_eq!(closed, 1);
    // The close of the first link is journaled before the second opens
    assert!(matches!(journal[1], LinkAction::Closed(_, 0)));
    assert_eq!(connector.connected_links(&device), 1);
    assert_eq!(sessions.active_link_count().await, 1);
    assert_eq!(sessions.status(&device).await, Some(LinkStatus::Connected));
}

#[tokio::test]
async fn test_superseded_link_events_never_reach_clients() {
    let connector = MockConnector::new();
    let (sessions, broadcaster) = manager(
        &connector,
        MockCloudAccount::with_token("tok"),
        MockManifestService::empty(),
    );
    let (_client, mut rx) = broadcaster.register().await;
    let device = DeviceId::new(DEVICE);

    sessions.connect(&lan("192.168.1.20")).await.unwrap();
    sessions.connect(&lan("192.168.1.21")).await.unwrap();

    connector
        .inject(&device, LinkEvent::Connected { reconnect_count: 0 })
        .await;

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&*first, r#"{"connect":true,"count":0}"#);
    assert!(rx.try_recv().is_err());

    let hosts: Vec<String> = connector
        .sessions()
        .await
        .into_iter()
        .map(|session| session.host)
        .collect();
    assert_eq!(hosts, vec!["192.168.1.20", "192.168.1.21"]);
}

#[tokio::test]
async fn test_open_failure_leaves_no_link() {
    let connector = MockConnector::new();
    connector.fail_opens("bad broker options").await;
    let (sessions, _) = manager(
        &connector,
        MockCloudAccount::with_token("tok"),
        MockManifestService::empty(),
    );

    let err = sessions.connect(&lan("192.168.1.20")).await.unwrap_err();
    assert!(matches!(err, RelayError::Transport(_)));
    assert_eq!(sessions.active_link_count().await, 0);
}

#[tokio::test]
async fn test_manifest_failure_is_a_warning_not_a_failure() {
    let connector = MockConnector::new();
    let (sessions, _) = manager(
        &connector,
        MockCloudAccount::with_token("tok").with_firmware(json!({"version": "1.0"}), json!([])),
        MockManifestService::failing("manifest host down"),
    );

    let outcome = sessions.connect(&credentials()).await.unwrap();
    assert_eq!(outcome.device_id, DeviceId::new(DEVICE));
    match outcome.warnings.as_slice() {
        [RelayError::CollaboratorUnavailable { collaborator, .. }] => {
            assert_eq!(collaborator, "manifest")
        }
        other => panic!("Expected one manifest warning, got {other:?}"),
    }
    assert_eq!(sessions.active_link_count().await, 1);
}

#[tokio::test]
async fn test_sign_in_failure_aborts_connect() {
    let connector = MockConnector::new();
    let (sessions, _) = manager(
        &connector,
        MockCloudAccount::rejecting(),
        MockManifestService::with_entry(DeviceFamily::X1, json!({"version": "1.0"})),
    );

    let err = sessions.connect(&credentials()).await.unwrap_err();
    match err {
        RelayError::CollaboratorUnavailable { collaborator, .. } => assert_eq!(collaborator, "auth"),
        other => panic!("Expected auth failure, got {other:?}"),
    }
    assert!(connector.journal().await.is_empty());
}

#[tokio::test]
async fn test_disconnect_removes_only_that_device() {
    let connector = MockConnector::new();
    let (sessions, _) = manager(
        &connector,
        MockCloudAccount::with_token("tok"),
        MockManifestService::empty(),
    );

    sessions.connect(&lan("192.168.1.20")).await.unwrap();
    sessions
        .connect(&ConnectRequest::Coordinates(CoordinatesRequest {
            host: "192.168.1.30".to_string(),
            access_code: "87654321".to_string(),
            device_id: "01P00A123456789".to_string(),
        }))
        .await
        .unwrap();

    assert!(sessions.disconnect(&DeviceId::new(DEVICE)).await);
    assert!(!sessions.disconnect(&DeviceId::new(DEVICE)).await);
    let remaining: Vec<DeviceId> = sessions
        .statuses()
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(remaining, vec![DeviceId::new("01P00A123456789")]);
}
