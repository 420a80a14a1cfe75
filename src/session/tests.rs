//! Integration tests for device sessions
//!
//! These drive a session through the mock transport and check lifecycle
//! transitions, client readiness and failure of pending work on link loss.

use super::*;
use crate::config::ServiceKind;
use crate::gatt::HR_MEASUREMENT;
use crate::pmd::{PMD_CONTROL_POINT, PMD_DATA};
use crate::test_utils::MockTransport;
use crate::transport::TransportEvent;
use crate::types::ConnectionType;

const ADDRESS: &str = "A0:9E:1A:00:00:01";
const WAIT: Duration = Duration::from_secs(2);

fn session_with(config: SdkConfig, services: Vec<Uuid>) -> (Arc<MockTransport>, DeviceSession) {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = Arc::new(MockTransport::new());
    let session = DeviceSession::new(ADDRESS, transport.clone(), config);
    transport.attach(session.event_sender(), services);
    (transport, session)
}

async fn wait_for_state(session: &DeviceSession, state: SessionState) {
    let mut watch = session.state_watch();
    tokio::time::timeout(WAIT, watch.wait_for(|change| change.current == state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {state:?}, stuck in {:?}", session.state()))
        .expect("session dropped");
}

#[tokio::test]
async fn direct_open_attaches_and_readies_clients() {
    let (transport, session) = session_with(SdkConfig::default(), vec![PMD_SERVICE, HR_SERVICE]);
    let mut changes = session.state_changes();

    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;
    session.wait_clients_ready(WAIT).await.unwrap();

    assert!(session.clients_ready());
    assert_eq!(transport.connects(), 1);
    let toggles = transport.notify_toggles();
    assert!(toggles.contains(&(PMD_CONTROL_POINT, true)));
    assert!(toggles.contains(&(PMD_DATA, true)));
    assert!(toggles.contains(&(HR_MEASUREMENT, true)));

    let first = changes.recv().await.unwrap();
    assert_eq!((first.previous, first.current), (SessionState::Closed, SessionState::Opening));
    let second = changes.recv().await.unwrap();
    assert_eq!((second.previous, second.current), (SessionState::Opening, SessionState::Open));
    assert_eq!(session.previous_state(), SessionState::Opening);

    assert!(session.pmd().is_ok());
    assert!(session.hr().is_ok());
    assert!(matches!(session.pftp(), Err(BleError::AttributeNotFound { uuid }) if uuid == PFTP_SERVICE));
}

#[tokio::test]
async fn accessors_require_open_session() {
    let (_transport, session) = session_with(SdkConfig::default(), vec![PMD_SERVICE]);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.clients_ready());
    assert!(matches!(session.pmd(), Err(BleError::NotConnected { .. })));
}

#[tokio::test]
async fn link_loss_parks_and_fails_pending_command() {
    let (transport, session) = session_with(SdkConfig::default(), vec![PMD_SERVICE]);
    let events = session.event_sender();
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;
    session.wait_clients_ready(WAIT).await.unwrap();

    let pmd = session.pmd().unwrap();
    let pending = tokio::spawn(async move { pmd.measurement_status().await });
    transport.wait_for_writes(1).await;

    events.send(TransportEvent::Disconnected { reason: Some("supervision timeout".into()) });
    wait_for_state(&session, SessionState::OpenPark).await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(BleError::Disconnected { .. })));
    assert!(!session.clients_ready());

    // Advertising again reconnects and the same client instance is reused
    events.send(TransportEvent::Advertisement { local_name: "Polar H10 0A3BA92B".into(), rssi: -60 });
    wait_for_state(&session, SessionState::Open).await;
    session.wait_clients_ready(WAIT).await.unwrap();
    assert_eq!(transport.connects(), 2);
    assert_eq!(session.device_name().unwrap().device_id, "0A3BA92B");
}

#[tokio::test]
async fn link_loss_without_reconnection_closes() {
    let config = SdkConfig { automatic_reconnection: false, ..SdkConfig::default() };
    let (_transport, session) = session_with(config, vec![HR_SERVICE]);
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;

    session.event_sender().send(TransportEvent::Disconnected { reason: None });
    wait_for_state(&session, SessionState::Closed).await;
    assert_eq!(session.previous_state(), SessionState::Open);
}

#[tokio::test]
async fn explicit_close_never_parks() {
    let (transport, session) = session_with(SdkConfig::default(), vec![HR_SERVICE]);
    let mut changes = session.state_changes();
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;

    session.close().unwrap();
    wait_for_state(&session, SessionState::Closed).await;
    assert_eq!(transport.disconnects(), 1);

    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push(change.current);
    }
    assert_eq!(
        seen,
        vec![SessionState::Opening, SessionState::Open, SessionState::Closing, SessionState::Closed]
    );
}

#[tokio::test]
async fn connection_failure_parks_until_advertisement() {
    let (transport, session) = session_with(SdkConfig::default(), vec![HR_SERVICE]);
    transport.detach();
    let events = session.event_sender();

    session.open().unwrap();
    wait_for_state(&session, SessionState::Opening).await;
    events.send(TransportEvent::ConnectionFailed { reason: "gatt error 133".into() });
    wait_for_state(&session, SessionState::OpenPark).await;

    transport.attach(events.clone(), vec![HR_SERVICE]);
    events.send(TransportEvent::Advertisement { local_name: "Polar OH1 0A3BA92B".into(), rssi: -70 });
    wait_for_state(&session, SessionState::Open).await;
}

#[tokio::test]
async fn advertisement_connection_type_waits_for_device() {
    let config = SdkConfig { connection_type: ConnectionType::OnAdvertisement, ..SdkConfig::default() };
    let (transport, session) = session_with(config, vec![HR_SERVICE]);

    session.open().unwrap();
    wait_for_state(&session, SessionState::OpenPark).await;
    assert_eq!(transport.connects(), 0);

    session.event_sender().send(TransportEvent::Advertisement { local_name: "Polar H10 0A3BA92B".into(), rssi: -55 });
    wait_for_state(&session, SessionState::Open).await;
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn notifications_reach_owning_client() {
    let (_transport, session) = session_with(SdkConfig::default(), vec![HR_SERVICE]);
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;
    session.wait_clients_ready(WAIT).await.unwrap();

    let mut measurements = session.hr().unwrap().subscribe();
    session.event_sender().notify(HR_MEASUREMENT, vec![0x06, 72]);

    let measurement = tokio::time::timeout(WAIT, measurements.recv()).await.unwrap().unwrap();
    assert_eq!(measurement.hr, 72);
    assert!(measurement.sensor_contact);
}

#[tokio::test]
async fn mtu_change_reaches_file_transfer() {
    let (_transport, session) = session_with(SdkConfig::default(), vec![PFTP_SERVICE]);
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;
    session.wait_clients_ready(WAIT).await.unwrap();

    session.event_sender().send(TransportEvent::MtuChanged(185));
    let pftp = session.pftp().unwrap();
    tokio::time::timeout(WAIT, async {
        while pftp.mtu() != 185 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn disabled_services_get_no_client() {
    let mut config = SdkConfig::default();
    config.services.remove(&ServiceKind::Hr);
    let (_transport, session) = session_with(config, vec![PMD_SERVICE, HR_SERVICE]);
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;

    assert!(matches!(session.hr(), Err(BleError::AttributeNotFound { .. })));
    assert!(session.pmd().is_ok());
}

#[tokio::test]
async fn dropping_session_stops_driver() {
    let (transport, session) = session_with(SdkConfig::default(), vec![HR_SERVICE]);
    let events = session.event_sender();
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;
    transport.detach();

    drop(session);
    tokio::time::timeout(WAIT, async {
        while events.send(TransportEvent::MtuChanged(23)) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(transport.disconnects(), 1);
}

#[tokio::test]
async fn dropping_session_publishes_closed() {
    let (transport, session) = session_with(SdkConfig::default(), vec![HR_SERVICE]);
    let watch = session.state_watch();
    let mut changes = session.state_changes();
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;

    drop(session);
    let mut seen = Vec::new();
    while let Ok(Ok(change)) = tokio::time::timeout(WAIT, changes.recv()).await {
        seen.push(change.current);
    }
    assert_eq!(
        seen,
        vec![SessionState::Opening, SessionState::Open, SessionState::Closing, SessionState::Closed]
    );
    assert_eq!(watch.borrow().current, SessionState::Closed);
    assert_eq!(transport.disconnects(), 1);
}

#[tokio::test]
async fn link_loss_cancels_unfinished_initialization() {
    let (transport, session) = session_with(SdkConfig::default(), vec![HR_SERVICE]);
    let events = session.event_sender();
    let notify_requests = |count: usize| {
        let transport = transport.clone();
        async move {
            tokio::time::timeout(WAIT, async {
                while transport.notify_toggles().len() < count {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
        }
    };

    // First connection stalls inside its notify request
    transport.hold_notify(true);
    session.open().unwrap();
    wait_for_state(&session, SessionState::Open).await;
    notify_requests(1).await;

    events.send(TransportEvent::Disconnected { reason: None });
    wait_for_state(&session, SessionState::OpenPark).await;

    // The request of the lost connection completes late
    transport.hold_notify(false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    transport.hold_notify(true);

    events.send(TransportEvent::Advertisement { local_name: "Polar H10 0A3BA92B".into(), rssi: -60 });
    wait_for_state(&session, SessionState::Open).await;
    notify_requests(2).await;
    assert!(!session.clients_ready());
    assert!(matches!(session.wait_clients_ready(Duration::from_millis(20)).await, Err(BleError::Timeout { .. })));

    transport.hold_notify(false);
    session.wait_clients_ready(WAIT).await.unwrap();
}
