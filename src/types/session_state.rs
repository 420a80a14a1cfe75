//! Device session lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum SessionState {
    #[default]
    Closed,
    Opening,
    Open,
    /// Disconnected, waiting for the device to advertise again
    OpenPark,
    Closing,
}

impl SessionState {
    /// Whether the GATT link is up in this state.
    pub fn is_connected(self) -> bool {
        self == SessionState::Open
    }
}

/// How a session reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Connect immediately when opened
    #[default]
    Direct,
    /// Park until the device is seen advertising, then connect
    OnAdvertisement,
}

/// Observed state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct StateChange {
    pub previous: SessionState,
    pub current: SessionState,
}
