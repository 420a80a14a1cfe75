//! Offline recording trigger configuration

use std::collections::BTreeMap;

use super::{PmdMeasurementType, PmdSetting, TriggerMode, TriggerStatus};
use crate::codec;
use crate::{BleError, Result};

/// Offline recording trigger as stored on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmdOfflineTrigger {
    pub mode: TriggerMode,
    pub triggers: BTreeMap<PmdMeasurementType, (TriggerStatus, Option<PmdSetting>)>,
}

impl PmdOfflineTrigger {
    /// Parse a trigger status response.
    ///
    /// Layout: `[mode]` then `[status, type, (len, settings[len]) if enabled]` repeated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mode_byte = codec::byte_at(data, 0, "offline trigger mode")?;
        let mode = TriggerMode::from_byte(mode_byte).ok_or_else(|| {
            BleError::decode("offline trigger mode", format!("invalid mode byte {:#04x}", mode_byte))
        })?;

        let mut triggers = BTreeMap::new();
        let mut offset = 1;
        while offset < data.len() {
            let status_byte = data[offset];
            let status = TriggerStatus::from_byte(status_byte).ok_or_else(|| {
                BleError::decode(
                    "offline trigger status",
                    format!("invalid status byte {:#04x} at offset {}", status_byte, offset),
                )
            })?;
            let measurement_type =
                PmdMeasurementType::from_byte(codec::byte_at(data, offset + 1, "offline trigger type")?);
            offset += 2;

            let setting = if status == TriggerStatus::Enabled {
                let len = codec::byte_at(data, offset, "offline trigger settings length")? as usize;
                let bytes = codec::field(data, offset + 1, len, "offline trigger settings")?;
                offset += 1 + len;
                Some(PmdSetting::parse(bytes)?)
            } else {
                None
            };

            triggers.insert(measurement_type, (status, setting));
        }

        Ok(Self { mode, triggers })
    }

    /// Measurement types that start recording when the trigger fires.
    pub fn enabled_types(&self) -> impl Iterator<Item = PmdMeasurementType> + '_ {
        self.triggers
            .iter()
            .filter(|(_, (status, _))| *status == TriggerStatus::Enabled)
            .map(|(ty, _)| *ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SettingType;

    #[test]
    fn parses_mixed_triggers() {
        let data = [
            0x01, // system start
            0x01, 0x02, 0x04, 0x00, 0x01, 0x34, 0x00, // acc enabled, 52 Hz
            0x00, 0x00, // ecg disabled
        ];
        let trigger = PmdOfflineTrigger::parse(&data).unwrap();

        assert_eq!(trigger.mode, TriggerMode::SystemStart);
        let (status, setting) = &trigger.triggers[&PmdMeasurementType::Acc];
        assert_eq!(*status, TriggerStatus::Enabled);
        assert_eq!(setting.as_ref().unwrap().selected[&SettingType::SampleRate], 52);
        assert_eq!(trigger.triggers[&PmdMeasurementType::Ecg], (TriggerStatus::Disabled, None));
        assert_eq!(trigger.enabled_types().collect::<Vec<_>>(), vec![PmdMeasurementType::Acc]);
    }

    #[test]
    fn invalid_mode_is_decode_error() {
        assert!(matches!(PmdOfflineTrigger::parse(&[0x07]), Err(BleError::Decode { .. })));
        assert!(matches!(PmdOfflineTrigger::parse(&[]), Err(BleError::Decode { .. })));
    }

    #[test]
    fn truncated_settings_are_decode_error() {
        let data = [0x02, 0x01, 0x02, 0x04, 0x00, 0x01];
        assert!(matches!(PmdOfflineTrigger::parse(&data), Err(BleError::Decode { .. })));
    }

    #[test]
    fn invalid_status_is_decode_error() {
        assert!(PmdOfflineTrigger::parse(&[0x00, 0x05, 0x02]).is_err());
    }
}
