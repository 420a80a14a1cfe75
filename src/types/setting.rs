//! PMD measurement settings codec
//!
//! Settings travel as type-tagged value sets:
//! `(type: u8, count: u8, count × value)` repeated until the buffer ends, where
//! the value width depends on the type.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::codec;
use crate::{BleError, Result};

/// Setting kinds carried in a PMD settings record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum SettingType {
    SampleRate,
    Resolution,
    Range,
    RangeMilliUnit,
    Channels,
    /// Device-reported scale factor (f32 bit pattern), never sent back
    Factor,
    /// Security scheme id for offline recordings
    Security,
}

impl SettingType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::SampleRate),
            1 => Some(Self::Resolution),
            2 => Some(Self::Range),
            3 => Some(Self::RangeMilliUnit),
            4 => Some(Self::Channels),
            5 => Some(Self::Factor),
            6 => Some(Self::Security),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::SampleRate => 0,
            Self::Resolution => 1,
            Self::Range => 2,
            Self::RangeMilliUnit => 3,
            Self::Channels => 4,
            Self::Factor => 5,
            Self::Security => 6,
        }
    }

    /// Width in bytes of one value of this type.
    pub const fn field_size(self) -> usize {
        match self {
            Self::SampleRate | Self::Resolution | Self::Range => 2,
            Self::RangeMilliUnit | Self::Factor => 4,
            Self::Channels | Self::Security => 1,
        }
    }
}

/// Admissible and selected measurement settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmdSetting {
    /// Values the device accepts, per type
    pub settings: BTreeMap<SettingType, BTreeSet<u32>>,
    /// Exactly one chosen value per type
    pub selected: BTreeMap<SettingType, u32>,
}

impl PmdSetting {
    /// Parse a settings record; `selected` becomes the largest value per type.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let settings = Self::parse_values(data)?;
        let selected = settings
            .iter()
            .filter_map(|(ty, values)| values.iter().next_back().map(|max| (*ty, *max)))
            .collect();
        Ok(Self { settings, selected })
    }

    /// Parse a settings record keeping a caller supplied selection.
    pub fn parse_with_selection(data: &[u8], selected: BTreeMap<SettingType, u32>) -> Result<Self> {
        Ok(Self { settings: Self::parse_values(data)?, selected })
    }

    /// Build a request-side setting from a selection alone.
    pub fn from_selected(selected: BTreeMap<SettingType, u32>) -> Self {
        Self { settings: BTreeMap::new(), selected }
    }

    fn parse_values(data: &[u8]) -> Result<BTreeMap<SettingType, BTreeSet<u32>>> {
        let mut settings: BTreeMap<SettingType, BTreeSet<u32>> = BTreeMap::new();
        let mut offset = 0;

        while offset < data.len() {
            let type_byte = data[offset];
            let Some(ty) = SettingType::from_byte(type_byte) else {
                warn!(setting_type = type_byte, "Unknown PMD setting type, skipping rest of record");
                break;
            };
            let count = codec::byte_at(data, offset + 1, "PMD setting count")? as usize;
            offset += 2;

            let width = ty.field_size();
            let values = settings.entry(ty).or_default();
            for _ in 0..count {
                let bytes = codec::field(data, offset, width, "PMD setting value")?;
                values.insert(codec::le_u32(bytes));
                offset += width;
            }
        }

        Ok(settings)
    }

    /// Serialize `selected` as a start request payload; FACTOR is never sent.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.selected.len() * 6);
        for (ty, value) in &self.selected {
            if *ty == SettingType::Factor {
                continue;
            }
            out.push(ty.to_byte());
            out.push(1);
            out.extend(codec::to_le_bytes(*value, ty.field_size()));
        }
        out
    }

    /// A setting whose selection is the maximum of every admissible set.
    pub fn max_settings(&self) -> Self {
        let selected = self
            .settings
            .iter()
            .filter_map(|(ty, values)| values.iter().next_back().map(|max| (*ty, *max)))
            .collect();
        Self { settings: self.settings.clone(), selected }
    }

    /// Selected sample rate in Hz, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.selected.get(&SettingType::SampleRate).copied()
    }

    /// Scale factor reported by the device; 1.0 when absent.
    pub fn factor(&self) -> f32 {
        self.selected.get(&SettingType::Factor).map(|bits| f32::from_bits(*bits)).unwrap_or(1.0)
    }

    /// Merge device-reported FACTOR from a start response into this selection.
    pub fn with_response(mut self, response: &PmdSetting) -> Self {
        if let Some(factor) = response.selected.get(&SettingType::Factor) {
            self.selected.insert(SettingType::Factor, *factor);
        }
        self
    }

    /// Check that every selected value is admissible on the device.
    pub fn validate_selection(&self, available: &PmdSetting) -> Result<()> {
        for (ty, value) in &self.selected {
            if matches!(ty, SettingType::Factor | SettingType::Security) {
                continue;
            }
            let allowed = available.settings.get(ty).ok_or_else(|| {
                BleError::invalid_argument(format!("{:?} is not configurable on this device", ty))
            })?;
            if !allowed.contains(value) {
                return Err(BleError::invalid_argument(format!(
                    "{:?} {} not in {:?}",
                    ty, value, allowed
                )));
            }
        }
        Ok(())
    }
}
