//! Decoded sensor samples and stream frames

use serde::{Deserialize, Serialize};

use super::PmdMeasurementType;

/// ECG sample in microvolts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct EcgSample {
    pub timestamp: u64,
    pub microvolts: i32,
    /// Present on tagged (frame type 1) samples
    pub tags: Option<EcgTags>,
}

/// Status bits carried by tagged ECG samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct EcgTags {
    pub over_sampling: bool,
    pub skin_contact: u8,
    pub contact_impedance: u8,
}

/// Accelerometer sample in milli-g.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct AccSample {
    pub timestamp: u64,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Optical sample: three PPG channels plus ambient light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PpgSample {
    pub timestamp: u64,
    pub channels: [i32; 3],
    pub ambient: i32,
}

/// Peak-to-peak interval sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PpiSample {
    pub timestamp: u64,
    pub hr: u8,
    pub pp_ms: u16,
    pub pp_error_estimate_ms: u16,
    pub blocker: bool,
    pub skin_contact_status: bool,
    pub skin_contact_supported: bool,
}

/// Three-axis sample in physical units (deg/s for gyro, gauss for magnetometer).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct AxisSample {
    pub timestamp: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Heart rate sample from offline HR data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct HrSample {
    pub timestamp: u64,
    pub hr: u8,
    pub ppg_quality: Option<u8>,
    pub corrected_hr: Option<u8>,
}

/// Single-channel floating point sample (pressure, temperature).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct ScalarSample {
    pub timestamp: u64,
    pub value: f32,
}

/// Samples of one frame, typed by measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Samples {
    Ecg(Vec<EcgSample>),
    Acc(Vec<AccSample>),
    Ppg(Vec<PpgSample>),
    Ppi(Vec<PpiSample>),
    Gyro(Vec<AxisSample>),
    Magnetometer(Vec<AxisSample>),
    Hr(Vec<HrSample>),
    Pressure(Vec<ScalarSample>),
    Temperature(Vec<ScalarSample>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Ecg(s) => s.len(),
            Samples::Acc(s) => s.len(),
            Samples::Ppg(s) => s.len(),
            Samples::Ppi(s) => s.len(),
            Samples::Gyro(s) | Samples::Magnetometer(s) => s.len(),
            Samples::Hr(s) => s.len(),
            Samples::Pressure(s) | Samples::Temperature(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamps of every sample in order.
    pub fn timestamps(&self) -> Vec<u64> {
        match self {
            Samples::Ecg(s) => s.iter().map(|x| x.timestamp).collect(),
            Samples::Acc(s) => s.iter().map(|x| x.timestamp).collect(),
            Samples::Ppg(s) => s.iter().map(|x| x.timestamp).collect(),
            Samples::Ppi(s) => s.iter().map(|x| x.timestamp).collect(),
            Samples::Gyro(s) | Samples::Magnetometer(s) => s.iter().map(|x| x.timestamp).collect(),
            Samples::Hr(s) => s.iter().map(|x| x.timestamp).collect(),
            Samples::Pressure(s) | Samples::Temperature(s) => {
                s.iter().map(|x| x.timestamp).collect()
            }
        }
    }
}

/// One decoded PMD data frame. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct StreamFrame {
    pub measurement_type: PmdMeasurementType,
    /// Device clock timestamp of the last sample, in nanoseconds
    pub timestamp: u64,
    pub frame_type: u8,
    pub compressed: bool,
    pub samples: Samples,
}
