//! Device Information service client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{GattLink, ServiceClient, bluetooth_uuid};
use crate::transport::Notification;
use crate::{BleError, Result};

pub const DIS_SERVICE: Uuid = bluetooth_uuid(0x180A);

const MANUFACTURER_NAME: Uuid = bluetooth_uuid(0x2A29);
const MODEL_NUMBER: Uuid = bluetooth_uuid(0x2A24);
const SERIAL_NUMBER: Uuid = bluetooth_uuid(0x2A25);
const HARDWARE_REVISION: Uuid = bluetooth_uuid(0x2A27);
const FIRMWARE_REVISION: Uuid = bluetooth_uuid(0x2A26);
const SOFTWARE_REVISION: Uuid = bluetooth_uuid(0x2A28);

/// Strings read from the Device Information service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct DeviceInformation {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
}

/// Reads device information once per connection.
pub struct DisClient {
    link: GattLink,
    info: Mutex<Option<DeviceInformation>>,
}

impl DisClient {
    pub fn new(link: GattLink) -> Self {
        Self { link, info: Mutex::new(None) }
    }

    /// Information read during initialization, if it has completed.
    pub fn information(&self) -> Option<DeviceInformation> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn read_string(&self, characteristic: Uuid) -> Result<Option<String>> {
        match self.link.read(DIS_SERVICE, characteristic).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string();
                trace!(address = self.link.address(), %characteristic, value = %text, "DIS read");
                Ok(Some(text))
            }
            Err(BleError::AttributeNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ServiceClient for DisClient {
    fn service(&self) -> Uuid {
        DIS_SERVICE
    }

    fn handles(&self, _characteristic: Uuid) -> bool {
        false
    }

    fn on_notification(&self, _notification: &Notification) {}

    async fn initialize(&self) -> Result<()> {
        let info = DeviceInformation {
            manufacturer: self.read_string(MANUFACTURER_NAME).await?,
            model: self.read_string(MODEL_NUMBER).await?,
            serial_number: self.read_string(SERIAL_NUMBER).await?,
            hardware_revision: self.read_string(HARDWARE_REVISION).await?,
            firmware_revision: self.read_string(FIRMWARE_REVISION).await?,
            software_revision: self.read_string(SOFTWARE_REVISION).await?,
        };
        debug!(address = self.link.address(), info = ?info, "Device information read");
        *self.info.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.info.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn on_disconnected(&self) {
        *self.info.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
