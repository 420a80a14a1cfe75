//! Device-side BLE protocol core for Polar sensors.
//!
//! Polar BLE implements the protocol stack between an application and a Polar
//! wearable: the session lifecycle, the PMD sensor streaming protocol, and PFTP
//! file transfer over GATT. The platform BLE stack stays outside; it plugs in
//! through the [`BleTransport`] trait and feeds observations back as
//! [`TransportEvent`]s.
//!
//! # Features
//!
//! - **Sessions**: per-device lifecycle with automatic reconnection on advertisement
//! - **PMD streaming**: control point commands, setting negotiation, typed samples
//!   with reconstructed timestamps, delta-compressed frames
//! - **PFTP**: MTU-sized fragmentation, file get/put/remove, directory listing
//! - **Standard services**: heart rate and device information clients
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use polar_ble::{DeviceRegistry, SdkConfig};
//! use polar_ble::types::PmdMeasurementType;
//! use futures::StreamExt;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run(transport: Arc<dyn polar_ble::BleTransport>) -> polar_ble::Result<()> {
//! let registry = DeviceRegistry::new(transport, SdkConfig::default());
//! let session = registry.session("A0:9E:1A:00:00:01");
//! session.open()?;
//! session.wait_clients_ready(Duration::from_secs(10)).await?;
//!
//! let pmd = session.pmd()?;
//! let settings = pmd.measurement_settings(PmdMeasurementType::Ecg).await?.max_settings();
//! let mut stream = pmd.start_streaming(PmdMeasurementType::Ecg, settings).await?;
//!
//! while let Some(frame) = stream.next().await {
//!     println!("{:?}", frame?.samples);
//! }
//! # Ok(())
//! # }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
pub mod logging;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod transport;
pub mod types;

// Protocols and service clients
pub mod gatt;
pub mod pftp;
pub mod pmd;

// Session architecture
mod driver;
pub mod registry;
pub mod session;
pub mod stream;

// Core exports
pub use config::SdkConfig;
pub use error::*;
pub use transport::{BleTransport, Notification, TransportEvent, TransportEventSender};
pub use types::{ConnectionType, PmdMeasurementType, SessionState, StateChange, StreamFrame};

// Main API exports
pub use gatt::{DisClient, GattClient, HrClient};
pub use pftp::PftpClient;
pub use pmd::PmdClient;
pub use registry::DeviceRegistry;
pub use session::DeviceSession;
pub use stream::SensorStream;
