//! GATT service clients
//!
//! Each supported service gets one client, chosen by service UUID when the
//! platform reports discovered services. Clients share nothing but the link.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{SdkConfig, ServiceKind};
use crate::pftp::{PFTP_SERVICE, PftpClient};
use crate::pmd::{PMD_SERVICE, PmdClient};
use crate::transport::{BleTransport, Notification, ScanPause};
use crate::Result;

mod dis;
mod hr;

pub use dis::{DIS_SERVICE, DeviceInformation, DisClient};
pub use hr::{HR_MEASUREMENT, HR_SERVICE, HrClient, HrMeasurement};

const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16-bit SIG assigned number to a full UUID.
pub const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Characteristic I/O for one device address.
#[derive(Clone)]
pub struct GattLink {
    address: Arc<str>,
    transport: Arc<dyn BleTransport>,
}

impl GattLink {
    pub fn new(address: impl Into<Arc<str>>, transport: Arc<dyn BleTransport>) -> Self {
        Self { address: address.into(), transport }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport(&self) -> &Arc<dyn BleTransport> {
        &self.transport
    }

    pub async fn write(&self, service: Uuid, characteristic: Uuid, data: &[u8], with_response: bool) -> Result<()> {
        self.transport.write_characteristic(&self.address, service, characteristic, data, with_response).await
    }

    pub async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        self.transport.read_characteristic(&self.address, service, characteristic).await
    }

    pub async fn set_notify(&self, service: Uuid, characteristic: Uuid, enable: bool) -> Result<()> {
        self.transport.set_notify(&self.address, service, characteristic, enable).await
    }

    /// Pause background scanning until the guard drops.
    pub fn pause_scanning(&self) -> ScanPause {
        ScanPause::new(self.transport.clone())
    }
}

impl std::fmt::Debug for GattLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattLink").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Contract shared by every service client.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Service UUID this client binds to
    fn service(&self) -> Uuid;

    /// Whether notifications from `characteristic` belong to this client
    fn handles(&self, characteristic: Uuid) -> bool;

    /// Handle a notification for one of this client's characteristics.
    /// Must not block; called from the session event loop.
    fn on_notification(&self, notification: &Notification);

    /// Run the client's ready sequence after connection.
    async fn initialize(&self) -> Result<()>;

    fn is_ready(&self) -> bool;

    /// Fail pending operations and reset to idle.
    fn on_disconnected(&self);
}

/// Client for one discovered service.
#[derive(Clone)]
pub enum GattClient {
    Dis(Arc<DisClient>),
    Hr(Arc<HrClient>),
    Pmd(Arc<PmdClient>),
    Pftp(Arc<PftpClient>),
}

impl GattClient {
    /// Create the client for `service` if the configuration enables it.
    pub fn for_service(service: Uuid, link: &GattLink, config: &SdkConfig) -> Option<Self> {
        let kind = match service {
            s if s == DIS_SERVICE => ServiceKind::Dis,
            s if s == HR_SERVICE => ServiceKind::Hr,
            s if s == PMD_SERVICE => ServiceKind::Pmd,
            s if s == PFTP_SERVICE => ServiceKind::Pftp,
            _ => return None,
        };
        if !config.service_enabled(kind) {
            return None;
        }

        let client = match kind {
            ServiceKind::Dis => GattClient::Dis(Arc::new(DisClient::new(link.clone()))),
            ServiceKind::Hr => GattClient::Hr(Arc::new(HrClient::new(link.clone(), config))),
            ServiceKind::Pmd => GattClient::Pmd(Arc::new(PmdClient::new(link.clone(), config))),
            ServiceKind::Pftp => GattClient::Pftp(Arc::new(PftpClient::new(link.clone(), config))),
        };
        Some(client)
    }

    pub fn as_service(&self) -> &dyn ServiceClient {
        match self {
            GattClient::Dis(c) => c.as_ref(),
            GattClient::Hr(c) => c.as_ref(),
            GattClient::Pmd(c) => c.as_ref(),
            GattClient::Pftp(c) => c.as_ref(),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            GattClient::Dis(_) => ServiceKind::Dis,
            GattClient::Hr(_) => ServiceKind::Hr,
            GattClient::Pmd(_) => ServiceKind::Pmd,
            GattClient::Pftp(_) => ServiceKind::Pftp,
        }
    }
}

impl std::fmt::Debug for GattClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GattClient::{:?}", self.kind())
    }
}
