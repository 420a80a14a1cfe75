//! Device sessions
//!
//! A [`DeviceSession`] owns one device address: its lifecycle state, the GATT
//! clients bound to discovered services, and the driver task that serializes
//! every transport event for that device. Sessions for different devices run
//! independently.
//!
//! ```rust,no_run
//! use polar_ble::{DeviceSession, SdkConfig, SessionState};
//! # use std::sync::Arc;
//! # async fn run(transport: Arc<dyn polar_ble::BleTransport>) -> polar_ble::Result<()> {
//! let session = DeviceSession::new("A0:9E:1A:00:00:01", transport, SdkConfig::default());
//! let mut changes = session.state_changes();
//! session.open()?;
//!
//! while let Ok(change) = changes.recv().await {
//!     if change.current == SessionState::Open {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::config::SdkConfig;
use crate::driver::{Driver, SessionCommand};
use crate::gatt::{DIS_SERVICE, DisClient, GattClient, GattLink, HR_SERVICE, HrClient};
use crate::pftp::{PFTP_SERVICE, PftpClient};
use crate::pmd::{PMD_SERVICE, PmdClient};
use crate::transport::{BleTransport, Notification, TransportEventSender};
use crate::types::{PolarDeviceName, SessionState, StateChange};
use crate::{BleError, Result};

mod state;
#[cfg(test)]
mod tests;

pub use state::{Policy, SessionAction, SessionInput, Transition, transition};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session state shared between the public handle and its driver.
///
/// Only the driver task mutates lifecycle state, so transitions never race.
pub(crate) struct Shared {
    pub(crate) link: GattLink,
    pub(crate) config: SdkConfig,
    state: watch::Sender<StateChange>,
    changes: broadcast::Sender<StateChange>,
    clients: Mutex<Vec<GattClient>>,
    ready: watch::Sender<bool>,
    device_name: Mutex<Option<PolarDeviceName>>,
    initialization: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn new(link: GattLink, config: SdkConfig) -> Self {
        let (changes, _) = broadcast::channel(config.event_buffer);
        let initial = StateChange { previous: SessionState::Closed, current: SessionState::Closed };
        Self {
            link,
            config,
            state: watch::Sender::new(initial),
            changes,
            clients: Mutex::new(Vec::new()),
            ready: watch::Sender::new(false),
            device_name: Mutex::new(None),
            initialization: Mutex::new(None),
        }
    }

    pub(crate) fn address(&self) -> &str {
        self.link.address()
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.borrow().current
    }

    fn policy(&self) -> Policy {
        Policy {
            automatic_reconnection: self.config.automatic_reconnection,
            connection_type: self.config.connection_type,
        }
    }

    /// Run one input through the state machine and publish the result.
    pub(crate) fn apply(&self, input: SessionInput) -> Option<SessionAction> {
        let previous = self.state();
        let Some(Transition { next, action }) = transition(previous, input, self.policy()) else {
            trace!(address = self.address(), state = ?previous, input = ?input, "Input ignored");
            return None;
        };

        self.publish(next);
        action
    }

    /// Settle in `Closed` regardless of where the lifecycle stopped.
    pub(crate) fn force_closed(&self) {
        self.publish(SessionState::Closed);
    }

    fn publish(&self, next: SessionState) {
        let previous = self.state();
        if next == previous {
            return;
        }
        let change = StateChange { previous, current: next };
        info!(address = self.address(), from = ?previous, to = ?next, "Session state changed");
        self.state.send_replace(change);
        // No subscribers is fine; late subscribers only see future changes
        let _ = self.changes.send(change);
        self.refresh_ready();
    }

    /// Bind clients to discovered services, keeping instances across reconnects.
    pub(crate) fn attach_clients(&self, services: &[Uuid]) -> Vec<GattClient> {
        let mut clients = lock(&self.clients);
        let mut attached = Vec::with_capacity(services.len());
        for service in services {
            let existing = clients.iter().find(|c| c.as_service().service() == *service).cloned();
            if let Some(client) = existing.or_else(|| GattClient::for_service(*service, &self.link, &self.config)) {
                attached.push(client);
            }
        }
        debug!(address = self.address(), clients = ?attached, "GATT clients attached");
        *clients = attached.clone();
        attached
    }

    /// Hand a notification to the client owning its characteristic.
    pub(crate) fn route(&self, notification: &Notification) {
        let clients = lock(&self.clients);
        match clients.iter().find(|c| c.as_service().handles(notification.characteristic)) {
            Some(client) => client.as_service().on_notification(notification),
            None => trace!(
                address = self.address(),
                characteristic = %notification.characteristic,
                "Notification for unbound characteristic dropped"
            ),
        }
    }

    /// Track the client initialization of the current connection.
    pub(crate) fn track_initialization(&self, task: JoinHandle<()>) {
        if let Some(previous) = lock(&self.initialization).replace(task) {
            previous.abort();
        }
    }

    /// Stop initialization of the lost connection and fail every pending operation.
    pub(crate) async fn link_lost(&self) {
        let initialization = lock(&self.initialization).take();
        if let Some(task) = initialization {
            task.abort();
            // Once joined the task can no longer mark clients ready
            let _ = task.await;
        }
        for client in lock(&self.clients).iter() {
            client.as_service().on_disconnected();
        }
        self.ready.send_replace(false);
    }

    pub(crate) fn set_device_name(&self, name: PolarDeviceName) {
        *lock(&self.device_name) = Some(name);
    }

    pub(crate) fn set_mtu(&self, mtu: u16) {
        for client in lock(&self.clients).iter() {
            if let GattClient::Pftp(pftp) = client {
                pftp.set_mtu(mtu);
            }
        }
    }

    pub(crate) fn clients_ready(&self) -> bool {
        let clients = lock(&self.clients);
        self.state().is_connected() && !clients.is_empty() && clients.iter().all(|c| c.as_service().is_ready())
    }

    pub(crate) fn refresh_ready(&self) {
        let ready = self.clients_ready();
        self.ready.send_if_modified(|current| std::mem::replace(current, ready) != ready);
    }

    fn client<T>(&self, service: Uuid, pick: impl Fn(&GattClient) -> Option<Arc<T>>) -> Result<Arc<T>> {
        if !self.state().is_connected() {
            return Err(BleError::NotConnected { address: self.address().to_string() });
        }
        lock(&self.clients).iter().find_map(pick).ok_or(BleError::AttributeNotFound { uuid: service })
    }
}

/// One device and its protocol clients.
///
/// Creating a session spawns its driver task, so it must happen inside a
/// tokio runtime. Dropping the session stops the driver.
pub struct DeviceSession {
    shared: Arc<Shared>,
    events: TransportEventSender,
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
}

impl DeviceSession {
    pub fn new(address: impl Into<Arc<str>>, transport: Arc<dyn BleTransport>, config: SdkConfig) -> Self {
        let address = address.into();
        let link = GattLink::new(address.clone(), transport);
        let shared = Arc::new(Shared::new(link, config));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = Driver::spawn(shared.clone(), event_rx, command_rx);

        Self { shared, events: TransportEventSender::new(address, event_tx), commands: command_tx, cancel }
    }

    pub fn address(&self) -> &str {
        self.shared.address()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.shared.config
    }

    /// Request the session to open. Progress is reported through state changes.
    pub fn open(&self) -> Result<()> {
        self.command(SessionCommand::Open)
    }

    /// Request the session to close. An explicit close never parks for reconnection.
    pub fn close(&self) -> Result<()> {
        self.command(SessionCommand::Close)
    }

    fn command(&self, command: SessionCommand) -> Result<()> {
        debug!(address = self.address(), command = ?command, "Session command");
        self.commands
            .send(command)
            .map_err(|_| BleError::transport_failed(format!("session driver for {} stopped", self.address())))
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// State before the most recent transition.
    pub fn previous_state(&self) -> SessionState {
        self.shared.state.borrow().previous
    }

    /// Latest transition as a watch; always holds the current state.
    pub fn state_watch(&self) -> watch::Receiver<StateChange> {
        self.shared.state.subscribe()
    }

    /// Every transition from now on.
    pub fn state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.shared.changes.subscribe()
    }

    /// True once the session is open and every attached client finished its ready sequence.
    pub fn clients_ready(&self) -> bool {
        self.shared.clients_ready()
    }

    /// Wait until [`DeviceSession::clients_ready`] holds.
    pub async fn wait_clients_ready(&self, timeout: Duration) -> Result<()> {
        let mut ready = self.shared.ready.subscribe();
        match tokio::time::timeout(timeout, ready.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(BleError::disconnected(self.address())),
            Err(_) => Err(BleError::Timeout { duration: timeout }),
        }
    }

    /// Identity from the most recent advertisement.
    pub fn device_name(&self) -> Option<PolarDeviceName> {
        lock(&self.shared.device_name).clone()
    }

    /// Handle the platform uses to deliver events for this device.
    pub fn event_sender(&self) -> TransportEventSender {
        self.events.clone()
    }

    pub fn pmd(&self) -> Result<Arc<PmdClient>> {
        self.shared.client(PMD_SERVICE, |c| match c {
            GattClient::Pmd(pmd) => Some(pmd.clone()),
            _ => None,
        })
    }

    pub fn pftp(&self) -> Result<Arc<PftpClient>> {
        self.shared.client(PFTP_SERVICE, |c| match c {
            GattClient::Pftp(pftp) => Some(pftp.clone()),
            _ => None,
        })
    }

    pub fn hr(&self) -> Result<Arc<HrClient>> {
        self.shared.client(HR_SERVICE, |c| match c {
            GattClient::Hr(hr) => Some(hr.clone()),
            _ => None,
        })
    }

    pub fn dis(&self) -> Result<Arc<DisClient>> {
        self.shared.client(DIS_SERVICE, |c| match c {
            GattClient::Dis(dis) => Some(dis.clone()),
            _ => None,
        })
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession").field("address", &self.address()).field("state", &self.state()).finish()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        debug!(address = self.address(), "Dropping device session");
        self.cancel.cancel();
    }
}
