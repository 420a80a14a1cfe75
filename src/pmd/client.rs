//! PMD service client

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::control_point::{ControlPoint, ControlPointResponse, PmdOpCode};
use super::frame::StreamDecoder;
use super::{PMD_CONTROL_POINT, PMD_DATA, PMD_SERVICE};
use crate::config::SdkConfig;
use crate::gatt::{GattLink, ServiceClient};
use crate::stream::SensorStream;
use crate::transport::Notification;
use crate::types::{
    MeasurementStatus, PmdMeasurementType, PmdOfflineTrigger, PmdSetting, TriggerMode, TriggerStatus,
};
use crate::{BleError, Result};

/// SDK mode status byte meaning "enabled".
const SDK_MODE_ENABLED: u8 = 3;

/// Raw traffic on the PMD data characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PmdDataEvent {
    Frame(Bytes),
    /// The data characteristic reported an ATT error or stopped notifying
    Failed { status: u8, is_notifying: bool },
    Disconnected,
}

/// Measurement control and streaming for one device.
pub struct PmdClient {
    link: GattLink,
    control_point: ControlPoint,
    timeout: Duration,
    data: broadcast::Sender<PmdDataEvent>,
    control_point_notifying: AtomicBool,
    data_notifying: AtomicBool,
}

impl PmdClient {
    pub fn new(link: GattLink, config: &SdkConfig) -> Self {
        let (data, _) = broadcast::channel(config.event_buffer);
        Self {
            link,
            control_point: ControlPoint::new(),
            timeout: config.control_point_timeout(),
            data,
            control_point_notifying: AtomicBool::new(false),
            data_notifying: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        self.link.address()
    }

    /// Raw data frames from now on.
    pub fn subscribe_data(&self) -> broadcast::Receiver<PmdDataEvent> {
        self.data.subscribe()
    }

    async fn command(&self, opcode: PmdOpCode, params: &[u8]) -> Result<ControlPointResponse> {
        if !self.control_point_notifying.load(Ordering::Acquire) {
            return Err(BleError::NotifyNotEnabled { uuid: PMD_CONTROL_POINT });
        }
        self.control_point.execute(&self.link, self.timeout, opcode, params).await
    }

    /// Settings the device offers for a measurement.
    pub async fn measurement_settings(&self, measurement_type: PmdMeasurementType) -> Result<PmdSetting> {
        let response = self.command(PmdOpCode::GetMeasurementSettings, &[measurement_type.id()]).await?;
        PmdSetting::parse(&response.parameters)
    }

    /// Full setting ranges available in SDK mode.
    pub async fn full_settings(&self, measurement_type: PmdMeasurementType) -> Result<PmdSetting> {
        let response = self.command(PmdOpCode::GetSdkModeSettings, &[measurement_type.id()]).await?;
        PmdSetting::parse(&response.parameters)
    }

    /// Start an online measurement and stream its decoded frames.
    ///
    /// The returned stream stops the measurement when dropped.
    pub async fn start_streaming(
        self: &Arc<Self>,
        measurement_type: PmdMeasurementType,
        settings: PmdSetting,
    ) -> Result<SensorStream> {
        // Subscribe first so the first frame after the response is not lost
        let frames = self.data.subscribe();
        let settings = self.start(measurement_type.id(), settings).await?;
        info!(address = self.address(), measurement_type = ?measurement_type, "Streaming started");
        let decoder = StreamDecoder::new(measurement_type, &settings);
        Ok(SensorStream::new(Arc::downgrade(self), decoder, frames))
    }

    /// Stop an online measurement.
    pub async fn stop_streaming(&self, measurement_type: PmdMeasurementType) -> Result<()> {
        self.command(PmdOpCode::StopMeasurement, &[measurement_type.id()]).await?;
        info!(address = self.address(), measurement_type = ?measurement_type, "Streaming stopped");
        Ok(())
    }

    /// Start recording a measurement to device storage.
    pub async fn start_offline_recording(
        &self,
        measurement_type: PmdMeasurementType,
        settings: PmdSetting,
    ) -> Result<PmdSetting> {
        let settings = self.start(measurement_type.id() | PmdMeasurementType::OFFLINE_RECORDING_BIT, settings).await?;
        info!(address = self.address(), measurement_type = ?measurement_type, "Offline recording started");
        Ok(settings)
    }

    pub async fn stop_offline_recording(&self, measurement_type: PmdMeasurementType) -> Result<()> {
        let type_byte = measurement_type.id() | PmdMeasurementType::OFFLINE_RECORDING_BIT;
        self.command(PmdOpCode::StopMeasurement, &[type_byte]).await?;
        info!(address = self.address(), measurement_type = ?measurement_type, "Offline recording stopped");
        Ok(())
    }

    async fn start(&self, type_byte: u8, settings: PmdSetting) -> Result<PmdSetting> {
        let mut params = vec![type_byte];
        params.extend(settings.serialize());
        let response = self.command(PmdOpCode::RequestMeasurementStart, &params).await?;
        let reported = PmdSetting::parse(&response.parameters)?;
        Ok(settings.with_response(&reported))
    }

    /// Online/offline state of every measurement the device reports.
    pub async fn measurement_status(&self) -> Result<Vec<(PmdMeasurementType, MeasurementStatus)>> {
        let response = self.command(PmdOpCode::GetMeasurementStatus, &[]).await?;
        Ok(response
            .parameters
            .iter()
            .map(|b| (PmdMeasurementType::from_byte(*b), MeasurementStatus::from_byte(*b)))
            .collect())
    }

    pub async fn enable_sdk_mode(&self) -> Result<()> {
        self.command(PmdOpCode::RequestMeasurementStart, &[PmdMeasurementType::SdkMode.id()]).await?;
        info!(address = self.address(), "SDK mode enabled");
        Ok(())
    }

    pub async fn disable_sdk_mode(&self) -> Result<()> {
        self.command(PmdOpCode::StopMeasurement, &[PmdMeasurementType::SdkMode.id()]).await?;
        info!(address = self.address(), "SDK mode disabled");
        Ok(())
    }

    pub async fn sdk_mode_enabled(&self) -> Result<bool> {
        let response = self.command(PmdOpCode::GetSdkModeStatus, &[]).await?;
        let status = response
            .parameters
            .first()
            .ok_or_else(|| BleError::decode("SDK mode status", "response carries no status byte"))?;
        Ok(*status == SDK_MODE_ENABLED)
    }

    /// Offline recording trigger configuration.
    pub async fn offline_trigger(&self) -> Result<PmdOfflineTrigger> {
        let response = self.command(PmdOpCode::GetOfflineRecordingTriggerStatus, &[]).await?;
        PmdOfflineTrigger::parse(&response.parameters)
    }

    pub async fn set_offline_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        self.command(PmdOpCode::SetOfflineRecordingTriggerMode, &[mode.to_byte()]).await?;
        Ok(())
    }

    /// Enable or disable the offline trigger of one measurement.
    ///
    /// `settings` are sent only when enabling.
    pub async fn set_offline_trigger_setting(
        &self,
        measurement_type: PmdMeasurementType,
        status: TriggerStatus,
        settings: Option<PmdSetting>,
    ) -> Result<()> {
        let mut params = vec![status.to_byte(), measurement_type.id()];
        if status == TriggerStatus::Enabled {
            let bytes = settings.map(|s| s.serialize()).unwrap_or_default();
            let len = u8::try_from(bytes.len())
                .map_err(|_| BleError::invalid_argument(format!("{} byte trigger settings", bytes.len())))?;
            params.push(len);
            params.extend(bytes);
        }
        self.command(PmdOpCode::SetOfflineRecordingTriggerSettings, &params).await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceClient for PmdClient {
    fn service(&self) -> Uuid {
        PMD_SERVICE
    }

    fn handles(&self, characteristic: Uuid) -> bool {
        characteristic == PMD_CONTROL_POINT || characteristic == PMD_DATA
    }

    fn on_notification(&self, notification: &Notification) {
        let characteristic = notification.characteristic;
        if notification.status != 0 || !notification.is_notifying {
            warn!(
                address = self.address(),
                %characteristic,
                status = notification.status,
                is_notifying = notification.is_notifying,
                "PMD notification error"
            );
            let flag = if characteristic == PMD_CONTROL_POINT {
                &self.control_point_notifying
            } else {
                &self.data_notifying
            };
            flag.store(notification.is_notifying, Ordering::Release);
            if characteristic == PMD_CONTROL_POINT {
                let error = if notification.is_notifying {
                    BleError::transport_failed(format!("ATT status {}", notification.status))
                } else {
                    BleError::NotifyNotEnabled { uuid: characteristic }
                };
                self.control_point.fail_pending(error);
            } else {
                let _ = self.data.send(PmdDataEvent::Failed {
                    status: notification.status,
                    is_notifying: notification.is_notifying,
                });
            }
            return;
        }

        if characteristic == PMD_CONTROL_POINT {
            self.control_point.on_notification(&notification.data);
        } else if characteristic == PMD_DATA {
            // No receivers simply means no stream is open
            let _ = self.data.send(PmdDataEvent::Frame(notification.data.clone()));
        }
    }

    async fn initialize(&self) -> Result<()> {
        self.link.set_notify(PMD_SERVICE, PMD_CONTROL_POINT, true).await?;
        self.control_point_notifying.store(true, Ordering::Release);
        self.link.set_notify(PMD_SERVICE, PMD_DATA, true).await?;
        self.data_notifying.store(true, Ordering::Release);
        debug!(address = self.address(), "PMD client ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.control_point_notifying.load(Ordering::Acquire) && self.data_notifying.load(Ordering::Acquire)
    }

    fn on_disconnected(&self) {
        self.control_point_notifying.store(false, Ordering::Release);
        self.data_notifying.store(false, Ordering::Release);
        self.control_point.fail_pending(BleError::disconnected(self.address()));
        let _ = self.data.send(PmdDataEvent::Disconnected);
    }
}
