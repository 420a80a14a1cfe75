//! Heart Rate service client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{GattLink, ServiceClient, bluetooth_uuid};
use crate::codec;
use crate::config::SdkConfig;
use crate::transport::Notification;
use crate::{BleError, Result};

pub const HR_SERVICE: Uuid = bluetooth_uuid(0x180D);
pub const HR_MEASUREMENT: Uuid = bluetooth_uuid(0x2A37);

const FLAG_HR_U16: u8 = 0x01;
const FLAG_CONTACT_DETECTED: u8 = 0x02;
const FLAG_CONTACT_SUPPORTED: u8 = 0x04;
const FLAG_ENERGY_EXPENDED: u8 = 0x08;
const FLAG_RR_INTERVALS: u8 = 0x10;

/// One Heart Rate Measurement notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct HrMeasurement {
    pub hr: u16,
    pub sensor_contact: bool,
    pub sensor_contact_supported: bool,
    /// Kilojoules since the last reset
    pub energy_expended: Option<u16>,
    /// RR intervals in 1/1024 s as sent
    pub rr_intervals_raw: Vec<u16>,
    /// RR intervals converted to milliseconds
    pub rr_intervals_ms: Vec<u16>,
}

impl HrMeasurement {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let flags = codec::byte_at(data, 0, "HR measurement flags")?;
        let mut offset = 1;

        let hr = if flags & FLAG_HR_U16 != 0 {
            let value = codec::le_u32(codec::field(data, offset, 2, "HR measurement value")?) as u16;
            offset += 2;
            value
        } else {
            let value = codec::byte_at(data, offset, "HR measurement value")? as u16;
            offset += 1;
            value
        };

        let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
            let value = codec::le_u32(codec::field(data, offset, 2, "HR energy expended")?) as u16;
            offset += 2;
            Some(value)
        } else {
            None
        };

        let mut rr_intervals_raw = Vec::new();
        if flags & FLAG_RR_INTERVALS != 0 {
            let rr = data.get(offset..).unwrap_or_default();
            if rr.len() % 2 != 0 {
                return Err(BleError::decode("HR RR intervals", format!("odd RR payload length {}", rr.len())));
            }
            rr_intervals_raw = rr.chunks_exact(2).map(|b| codec::le_u32(b) as u16).collect();
        }
        let rr_intervals_ms = rr_intervals_raw
            .iter()
            .map(|rr| ((*rr as u32 * 1000 + 512) / 1024) as u16)
            .collect();

        Ok(Self {
            hr,
            sensor_contact: flags & FLAG_CONTACT_DETECTED != 0,
            sensor_contact_supported: flags & FLAG_CONTACT_SUPPORTED != 0,
            energy_expended,
            rr_intervals_raw,
            rr_intervals_ms,
        })
    }
}

/// Streams heart rate measurements.
pub struct HrClient {
    link: GattLink,
    measurements: broadcast::Sender<HrMeasurement>,
    notifying: AtomicBool,
}

impl HrClient {
    pub fn new(link: GattLink, config: &SdkConfig) -> Self {
        let (measurements, _) = broadcast::channel(config.event_buffer);
        Self { link, measurements, notifying: AtomicBool::new(false) }
    }

    /// Receive measurements from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HrMeasurement> {
        self.measurements.subscribe()
    }
}

#[async_trait]
impl ServiceClient for HrClient {
    fn service(&self) -> Uuid {
        HR_SERVICE
    }

    fn handles(&self, characteristic: Uuid) -> bool {
        characteristic == HR_MEASUREMENT
    }

    fn on_notification(&self, notification: &Notification) {
        if notification.status != 0 || !notification.is_notifying {
            warn!(
                address = self.link.address(),
                status = notification.status,
                is_notifying = notification.is_notifying,
                "HR notification error"
            );
            self.notifying.store(notification.is_notifying, Ordering::Release);
            return;
        }
        match HrMeasurement::parse(&notification.data) {
            Ok(measurement) => {
                trace!(address = self.link.address(), hr = measurement.hr, "HR measurement");
                let _ = self.measurements.send(measurement);
            }
            Err(e) => warn!(address = self.link.address(), error = %e, "Malformed HR measurement dropped"),
        }
    }

    async fn initialize(&self) -> Result<()> {
        self.link.set_notify(HR_SERVICE, HR_MEASUREMENT, true).await?;
        self.notifying.store(true, Ordering::Release);
        debug!(address = self.link.address(), "HR client ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.notifying.load(Ordering::Acquire)
    }

    fn on_disconnected(&self) {
        self.notifying.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;
    use std::sync::Arc;

    #[test]
    fn parses_u8_hr_with_contact() {
        let m = HrMeasurement::parse(&[0x06, 72]).unwrap();
        assert_eq!(m.hr, 72);
        assert!(m.sensor_contact && m.sensor_contact_supported);
        assert!(m.energy_expended.is_none());
        assert!(m.rr_intervals_ms.is_empty());
    }

    #[test]
    fn parses_u16_hr_energy_and_rr() {
        let m = HrMeasurement::parse(&[0x19, 0x2C, 0x01, 0x10, 0x00, 0x00, 0x04, 0x00, 0x02]).unwrap();
        assert_eq!(m.hr, 300);
        assert_eq!(m.energy_expended, Some(16));
        assert_eq!(m.rr_intervals_raw, vec![1024, 512]);
        assert_eq!(m.rr_intervals_ms, vec![1000, 500]);
    }

    #[test]
    fn truncated_measurement_is_decode_error() {
        assert!(HrMeasurement::parse(&[0x01, 0x2C]).is_err());
        assert!(HrMeasurement::parse(&[0x10, 60, 0x00]).is_err());
        assert!(HrMeasurement::parse(&[]).is_err());
    }

    #[tokio::test]
    async fn notifications_reach_subscribers() {
        let transport = Arc::new(MockTransport::new());
        let client = HrClient::new(GattLink::new("AA", transport.clone()), &SdkConfig::default());
        client.initialize().await.unwrap();
        assert!(client.is_ready());
        assert_eq!(transport.notify_toggles(), vec![(HR_MEASUREMENT, true)]);

        let mut rx = client.subscribe();
        client.on_notification(&Notification::new(HR_MEASUREMENT, vec![0x00, 61]));
        assert_eq!(rx.recv().await.unwrap().hr, 61);

        client.on_disconnected();
        assert!(!client.is_ready());
    }
}
