//! Polar device identity parsed from advertised local names

use serde::{Deserialize, Serialize};

const NAME_PREFIX: &str = "Polar";
const FULL_ID_LEN: usize = 8;
const PARTIAL_ID_LEN: usize = 7;

/// Identity parsed from a local name such as `"Polar H10 0A3BA92B"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PolarDeviceName {
    /// Model words between the prefix and the id, e.g. `"OH1"` or `"Verity Sense"`
    pub device_type: String,
    /// Complete 8-digit hexadecimal device id
    pub device_id: String,
    pub numeric_id: u32,
}

impl PolarDeviceName {
    /// Parse an advertised local name; `None` for non-Polar names or malformed ids.
    pub fn parse(local_name: &str) -> Option<Self> {
        let mut words: Vec<&str> = local_name.split_whitespace().collect();
        if words.len() < 3 || words[0] != NAME_PREFIX {
            return None;
        }

        let raw_id = words.pop()?;
        if !is_valid_device_id(raw_id) {
            return None;
        }
        let device_id = assemble_full_device_id(raw_id)?;
        let numeric_id = u32::from_str_radix(&device_id, 16).ok()?;

        Some(Self { device_type: words[1..].join(" "), device_id, numeric_id })
    }
}

/// True for 7-digit (checksum-less) or 8-digit hexadecimal device ids.
pub fn is_valid_device_id(id: &str) -> bool {
    matches!(id.len(), PARTIAL_ID_LEN | FULL_ID_LEN) && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Complete a 7-digit id with its check digit; 8-digit ids are returned uppercased.
pub fn assemble_full_device_id(id: &str) -> Option<String> {
    if !is_valid_device_id(id) {
        return None;
    }
    let id = id.to_ascii_uppercase();
    if id.len() == FULL_ID_LEN {
        return Some(id);
    }
    let check = check_digit(&id)?;
    Some(format!("{}{:X}", id, check))
}

/// Luhn-style check nibble over hexadecimal digits.
///
/// Walking from the rightmost nibble, every other nibble (starting with the
/// rightmost) is doubled and folded back below 16 by subtracting 15.
pub fn check_digit(id: &str) -> Option<u8> {
    let mut sum = 0u32;
    for (i, c) in id.chars().rev().enumerate() {
        let mut nibble = c.to_digit(16)?;
        if i % 2 == 0 {
            nibble *= 2;
            if nibble > 15 {
                nibble -= 15;
            }
        }
        sum += nibble;
    }
    Some(((16 - sum % 16) % 16) as u8)
}
