//! SDK configuration
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```rust
//! use polar_ble::SdkConfig;
//!
//! let config = SdkConfig::from_yaml_str("mtu: 185\nservices: [hr, pmd]\n").unwrap();
//! assert_eq!(config.mtu, 185);
//! assert!(config.automatic_reconnection);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::types::ConnectionType;
use crate::{BleError, Result};

/// Smallest ATT MTU the BLE specification allows.
pub const MIN_MTU: u16 = 23;

/// GATT services a session attaches clients for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Dis,
    Hr,
    Pmd,
    Pftp,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [ServiceKind::Dis, ServiceKind::Hr, ServiceKind::Pmd, ServiceKind::Pftp];
}

/// Runtime policy for device sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Control point response timeout
    pub control_point_timeout_ms: u64,
    /// Whole PFTP exchange timeout
    pub pftp_timeout_ms: u64,
    /// ATT MTU assumed until the platform reports a negotiated one
    pub mtu: u16,
    /// Park and reconnect when the link drops
    pub automatic_reconnection: bool,
    pub connection_type: ConnectionType,
    pub services: BTreeSet<ServiceKind>,
    /// Capacity of each broadcast channel
    pub event_buffer: usize,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            control_point_timeout_ms: 5_000,
            pftp_timeout_ms: 30_000,
            mtu: MIN_MTU,
            automatic_reconnection: true,
            connection_type: ConnectionType::Direct,
            services: ServiceKind::ALL.into_iter().collect(),
            event_buffer: 64,
        }
    }
}

impl SdkConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SdkConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| BleError::Config {
            details: format!("cannot read {}: {}", path.display(), e),
            source: Some(Box::new(e)),
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mtu < MIN_MTU {
            return Err(BleError::config(format!("mtu {} is below the minimum of {}", self.mtu, MIN_MTU)));
        }
        if self.control_point_timeout_ms == 0 {
            return Err(BleError::config("control_point_timeout_ms must be positive"));
        }
        if self.pftp_timeout_ms == 0 {
            return Err(BleError::config("pftp_timeout_ms must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(BleError::config("event_buffer must be positive"));
        }
        Ok(())
    }

    pub fn control_point_timeout(&self) -> Duration {
        Duration::from_millis(self.control_point_timeout_ms)
    }

    pub fn pftp_timeout(&self) -> Duration {
        Duration::from_millis(self.pftp_timeout_ms)
    }

    pub fn service_enabled(&self, kind: ServiceKind) -> bool {
        self.services.contains(&kind)
    }
}
