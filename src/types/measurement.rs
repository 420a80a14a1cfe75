//! PMD measurement type identifiers

use serde::{Deserialize, Serialize};

/// Measurement types understood by the PMD protocol.
///
/// The wire byte carries the type in its low 6 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum PmdMeasurementType {
    Ecg,
    Ppg,
    Acc,
    Ppi,
    Gyro,
    Magnetometer,
    SdkMode,
    Location,
    Pressure,
    Temperature,
    OfflineRecording,
    OfflineHr,
    /// Type id not known to this SDK
    Unknown(u8),
}

impl PmdMeasurementType {
    /// Mask selecting the type id from a wire byte.
    pub const ID_MASK: u8 = 0x3F;

    /// Bit set on a start request to ask for offline recording instead of streaming.
    pub const OFFLINE_RECORDING_BIT: u8 = 0x80;

    /// Parse a measurement type from a wire byte, ignoring the flag bits.
    pub fn from_byte(byte: u8) -> Self {
        match byte & Self::ID_MASK {
            0 => Self::Ecg,
            1 => Self::Ppg,
            2 => Self::Acc,
            3 => Self::Ppi,
            5 => Self::Gyro,
            6 => Self::Magnetometer,
            9 => Self::SdkMode,
            10 => Self::Location,
            11 => Self::Pressure,
            12 => Self::Temperature,
            13 => Self::OfflineRecording,
            14 => Self::OfflineHr,
            other => Self::Unknown(other),
        }
    }

    /// Numeric id as sent on the wire.
    pub fn id(self) -> u8 {
        match self {
            Self::Ecg => 0,
            Self::Ppg => 1,
            Self::Acc => 2,
            Self::Ppi => 3,
            Self::Gyro => 5,
            Self::Magnetometer => 6,
            Self::SdkMode => 9,
            Self::Location => 10,
            Self::Pressure => 11,
            Self::Temperature => 12,
            Self::OfflineRecording => 13,
            Self::OfflineHr => 14,
            Self::Unknown(id) => id & Self::ID_MASK,
        }
    }

    /// Whether samples of this type are produced by a PMD data stream.
    pub fn is_data_type(self) -> bool {
        !matches!(self, Self::SdkMode | Self::OfflineRecording | Self::Unknown(_))
    }
}

/// Offline trigger mode stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum TriggerMode {
    Disabled,
    SystemStart,
    ExerciseStart,
}

impl TriggerMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Disabled),
            1 => Some(Self::SystemStart),
            2 => Some(Self::ExerciseStart),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::SystemStart => 1,
            Self::ExerciseStart => 2,
        }
    }
}

/// Per-measurement offline trigger status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum TriggerStatus {
    Disabled,
    Enabled,
}

impl TriggerStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Disabled),
            1 => Some(Self::Enabled),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
        }
    }
}

/// Activity of one measurement as reported by the measurement status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum MeasurementStatus {
    Idle,
    Online,
    Offline,
    OnlineAndOffline,
}

impl MeasurementStatus {
    /// Decode bits 6-7 of a status byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte >> 6 {
            1 => Self::Online,
            2 => Self::Offline,
            3 => Self::OnlineAndOffline,
            _ => Self::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for id in 0u8..=15 {
            let ty = PmdMeasurementType::from_byte(id);
            assert_eq!(ty.id(), id);
        }
    }

    #[test]
    fn flag_bits_are_ignored() {
        assert_eq!(PmdMeasurementType::from_byte(0x82), PmdMeasurementType::Acc);
        assert_eq!(PmdMeasurementType::from_byte(0x40), PmdMeasurementType::Ecg);
    }

    #[test]
    fn status_byte_high_bits() {
        assert_eq!(MeasurementStatus::from_byte(0x42), MeasurementStatus::Online);
        assert_eq!(MeasurementStatus::from_byte(0xC0), MeasurementStatus::OnlineAndOffline);
        assert_eq!(MeasurementStatus::from_byte(0x02), MeasurementStatus::Idle);
    }

    #[test]
    fn trigger_bytes_reject_unknown_values() {
        assert_eq!(TriggerMode::from_byte(2), Some(TriggerMode::ExerciseStart));
        assert_eq!(TriggerMode::from_byte(3), None);
        assert_eq!(TriggerStatus::from_byte(7), None);
    }
}
