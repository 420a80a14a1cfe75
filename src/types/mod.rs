//! Core types for PMD measurement data and device sessions.
//!
//! This module provides the data structures that cross the protocol boundary:
//!
//! ## Architecture
//!
//! - [`PmdMeasurementType`] maps the PMD measurement type byte
//! - [`PmdSetting`] encodes and decodes type-tagged setting records
//! - [`PmdOfflineTrigger`] describes offline recording triggers
//! - [`StreamFrame`] and [`Samples`] carry decoded sensor data
//! - [`SessionState`] and [`StateChange`] describe the session lifecycle
//! - [`PolarDeviceName`] parses advertised device identities
//!
//! ## Usage Example
//!
//! ```rust
//! use polar_ble::types::{PmdSetting, SettingType};
//!
//! // type=sample rate, count=1, value=400 little-endian
//! let setting = PmdSetting::parse(&[0x00, 0x01, 0x90, 0x01]).unwrap();
//! assert_eq!(setting.selected[&SettingType::SampleRate], 400);
//! ```

mod device_id;
mod measurement;
mod sample;
mod session_state;
mod setting;
mod trigger;

// Re-export all public types
pub use device_id::{PolarDeviceName, assemble_full_device_id, check_digit, is_valid_device_id};
pub use measurement::{MeasurementStatus, PmdMeasurementType, TriggerMode, TriggerStatus};
pub use sample::{
    AccSample, AxisSample, EcgSample, EcgTags, HrSample, PpgSample, PpiSample, Samples,
    ScalarSample, StreamFrame,
};
pub use session_state::{ConnectionType, SessionState, StateChange};
pub use setting::{PmdSetting, SettingType};
pub use trigger::PmdOfflineTrigger;
