//! Sessions by device address

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

use crate::config::SdkConfig;
use crate::session::DeviceSession;
use crate::transport::{BleTransport, TransportEvent, TransportEventSender};
use crate::types::PolarDeviceName;

/// Owns one [`DeviceSession`] per address over a shared transport.
pub struct DeviceRegistry {
    transport: Arc<dyn BleTransport>,
    config: SdkConfig,
    sessions: Mutex<HashMap<String, Arc<DeviceSession>>>,
}

impl DeviceRegistry {
    pub fn new(transport: Arc<dyn BleTransport>, config: SdkConfig) -> Self {
        Self { transport, config, sessions: Mutex::new(HashMap::new()) }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<DeviceSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session for `address`, created closed on first use.
    pub fn session(&self, address: &str) -> Arc<DeviceSession> {
        self.sessions()
            .entry(address.to_string())
            .or_insert_with(|| {
                debug!(address, "Creating device session");
                Arc::new(DeviceSession::new(address, self.transport.clone(), self.config.clone()))
            })
            .clone()
    }

    pub fn get(&self, address: &str) -> Option<Arc<DeviceSession>> {
        self.sessions().get(address).cloned()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.sessions().keys().cloned().collect()
    }

    /// Close and forget the session for `address`.
    ///
    /// The session stops once the last outstanding handle to it is dropped.
    pub fn remove(&self, address: &str) -> bool {
        let Some(session) = self.sessions().remove(address) else {
            return false;
        };
        info!(address, "Removing device session");
        // A stopped driver has nothing left to close
        let _ = session.close();
        true
    }

    /// Route an advertisement, creating a session for unseen Polar devices.
    ///
    /// Returns the session the advertisement was delivered to, or `None` for
    /// unknown addresses whose name is not a Polar device name.
    pub fn handle_advertisement(&self, address: &str, local_name: &str, rssi: i16) -> Option<Arc<DeviceSession>> {
        let session = match self.get(address) {
            Some(session) => session,
            None if PolarDeviceName::parse(local_name).is_some() => self.session(address),
            None => {
                trace!(address, name = local_name, "Non-Polar advertisement ignored");
                return None;
            }
        };
        session.event_sender().send(TransportEvent::Advertisement { local_name: local_name.to_string(), rssi });
        Some(session)
    }

    /// Event sender of an existing session.
    pub fn event_sender(&self, address: &str) -> Option<TransportEventSender> {
        self.get(address).map(|session| session.event_sender())
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry").field("sessions", &self.addresses()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;
    use crate::types::SessionState;
    use std::time::Duration;

    fn registry() -> (Arc<MockTransport>, DeviceRegistry) {
        let transport = Arc::new(MockTransport::new());
        let registry = DeviceRegistry::new(transport.clone(), SdkConfig::default());
        (transport, registry)
    }

    #[tokio::test]
    async fn session_is_get_or_create() {
        let (_transport, registry) = registry();
        let first = registry.session("AA:BB");
        let second = registry.session("AA:BB");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.addresses(), vec!["AA:BB".to_string()]);
        assert!(registry.event_sender("AA:BB").is_some());
        assert!(registry.event_sender("CC:DD").is_none());
    }

    #[tokio::test]
    async fn advertisements_create_sessions_for_polar_devices_only() {
        let (_transport, registry) = registry();
        assert!(registry.handle_advertisement("11:22", "Fitbit Charge", -40).is_none());
        assert!(registry.get("11:22").is_none());

        let session = registry.handle_advertisement("AA:BB", "Polar H10 0A3BA92B", -50).unwrap();
        assert_eq!(session.address(), "AA:BB");

        // The driver picks the name up from the forwarded advertisement
        tokio::time::timeout(Duration::from_secs(1), async {
            while session.device_name().is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(session.device_name().unwrap().device_type, "H10");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn remove_closes_open_session() {
        let (transport, registry) = registry();
        let session = registry.session("AA:BB");
        transport.attach(session.event_sender(), Vec::new());
        session.open().unwrap();

        let mut watch = session.state_watch();
        tokio::time::timeout(Duration::from_secs(1), watch.wait_for(|c| c.current == SessionState::Open))
            .await
            .unwrap()
            .unwrap();

        assert!(registry.remove("AA:BB"));
        assert!(!registry.remove("AA:BB"));
        tokio::time::timeout(Duration::from_secs(1), watch.wait_for(|c| c.current == SessionState::Closed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removing_only_handle_publishes_closed() {
        for _ in 0..20 {
            let (transport, registry) = registry();
            let session = registry.session("AA:BB");
            transport.attach(session.event_sender(), Vec::new());
            let mut watch = session.state_watch();
            let mut changes = session.state_changes();
            session.open().unwrap();
            tokio::time::timeout(Duration::from_secs(1), watch.wait_for(|c| c.current == SessionState::Open))
                .await
                .unwrap()
                .unwrap();

            // The registry now owns the last handle
            drop(session);
            assert!(registry.remove("AA:BB"));

            let mut last = None;
            while let Ok(Ok(change)) = tokio::time::timeout(Duration::from_secs(1), changes.recv()).await {
                last = Some(change.current);
            }
            assert_eq!(last, Some(SessionState::Closed));
            assert_eq!(watch.borrow().current, SessionState::Closed);
            assert_eq!(transport.disconnects(), 1);
        }
    }
}
