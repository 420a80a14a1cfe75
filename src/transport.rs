//! Platform BLE transport boundary
//!
//! The platform (CoreBluetooth, BlueZ, Android) is a collaborator: it performs
//! connects and characteristic I/O when asked, and pushes what it observes back
//! through a [`TransportEventSender`]. Pushing never blocks the platform thread.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::Result;

/// Central-role primitives the protocol core needs from the platform.
///
/// Implementations only start operations; outcomes such as connection
/// establishment arrive later as [`TransportEvent`]s.
#[async_trait::async_trait]
pub trait BleTransport: Send + Sync + 'static {
    /// Start connecting to `address`; completion is reported as
    /// [`TransportEvent::Connected`] or [`TransportEvent::ConnectionFailed`].
    async fn connect(&self, address: &str) -> Result<()>;

    /// Start disconnecting; completion is reported as [`TransportEvent::Disconnected`].
    async fn disconnect(&self, address: &str) -> Result<()>;

    /// Write `data` to a characteristic.
    async fn write_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Read the current value of a characteristic.
    async fn read_characteristic(&self, address: &str, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Enable or disable notifications on a characteristic.
    async fn set_notify(&self, address: &str, service: Uuid, characteristic: Uuid, enable: bool) -> Result<()>;

    /// Ask the platform to pause background scanning.
    fn request_stop_scanning(&self);

    /// Undo one [`BleTransport::request_stop_scanning`].
    fn resume_scanning(&self);
}

/// A characteristic notification as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub data: Bytes,
    /// ATT status, 0 on success
    pub status: u8,
    pub is_notifying: bool,
}

impl Notification {
    /// Successful notification on an enabled characteristic.
    pub fn new(characteristic: Uuid, data: impl Into<Bytes>) -> Self {
        Self { characteristic, data: data.into(), status: 0, is_notifying: true }
    }
}

/// Events the platform reports for one device.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    ConnectionFailed { reason: String },
    Disconnected { reason: Option<String> },
    ServicesDiscovered(Vec<Uuid>),
    Notification(Notification),
    Advertisement { local_name: String, rssi: i16 },
    MtuChanged(u16),
}

/// Non-blocking handle the platform uses to feed events into a session.
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    address: Arc<str>,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSender {
    pub(crate) fn new(address: Arc<str>, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { address, tx }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queue an event. Returns false once the session has shut down.
    pub fn send(&self, event: TransportEvent) -> bool {
        trace!(address = %self.address, event = ?event, "Transport event");
        let delivered = self.tx.send(event).is_ok();
        if !delivered {
            debug!(address = %self.address, "Session gone, transport event dropped");
        }
        delivered
    }

    /// Shorthand for a successful notification.
    pub fn notify(&self, characteristic: Uuid, data: impl Into<Bytes>) -> bool {
        self.send(TransportEvent::Notification(Notification::new(characteristic, data)))
    }
}

/// Background scanning stays paused while this guard lives.
///
/// Dropping the guard resumes scanning on every exit path, including
/// cancellation of the owning future.
pub struct ScanPause {
    transport: Arc<dyn BleTransport>,
}

impl ScanPause {
    pub fn new(transport: Arc<dyn BleTransport>) -> Self {
        transport.request_stop_scanning();
        Self { transport }
    }
}

impl Drop for ScanPause {
    fn drop(&mut self) {
        self.transport.resume_scanning();
    }
}

impl std::fmt::Debug for ScanPause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanPause").finish_non_exhaustive()
    }
}
