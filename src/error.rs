//! Error types for the BLE protocol core.
//!
//! Every failure surfaced by this crate is a [`BleError`]. Variants follow the
//! three families the protocol stack can produce:
//!
//! ## Error Categories
//!
//! - **Transport Errors**: link loss, missing GATT attributes, notifications that
//!   were never enabled, platform write/read failures
//! - **Protocol Errors**: malformed PMD frames or responses, control point
//!   commands rejected by the device, RFC76 sequence gaps, PFTP device errors
//! - **Usage Errors**: a second request while one is in flight, invalid settings,
//!   bad configuration
//!
//! ## Recovery and Retry
//!
//! The core never retries on its own. Callers decide with [`BleError::is_retryable`]:
//!
//! ```rust
//! use polar_ble::BleError;
//!
//! let error = BleError::disconnected("A0:9E:1A:00:00:01");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::pmd::{PmdOpCode, PmdResponseCode};
use crate::types::PmdMeasurementType;

/// Result type alias for BLE operations.
pub type Result<T, E = BleError> = std::result::Result<T, E>;

/// Main error type for BLE protocol operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BleError {
    #[error("Device {address} disconnected")]
    Disconnected { address: String },

    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("GATT attribute {uuid} not found")]
    AttributeNotFound { uuid: Uuid },

    #[error("Notifications not enabled for characteristic {uuid}")]
    NotifyNotEnabled { uuid: Uuid },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Frame type {frame_type} (compressed: {compressed}) not supported for {measurement_type:?}")]
    UnsupportedFrameType { measurement_type: PmdMeasurementType, frame_type: u8, compressed: bool },

    #[error("Control point command {opcode:?} rejected: {status}")]
    ControlPoint { opcode: PmdOpCode, status: PmdResponseCode },

    #[error("RFC76 sequence error: expected {expected}, found {found}")]
    FramingSequence { expected: u8, found: u8 },

    #[error("PFTP request failed with device error {code}")]
    Pftp { code: u16 },

    #[error("{operation} already in progress")]
    OperationPending { operation: &'static str },

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Session {address} is not open")]
    NotConnected { address: String },

    #[error("Configuration error: {details}")]
    Config {
        details: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BleError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BleError::Disconnected { .. } => true,
            BleError::Transport { .. } => true,
            BleError::Timeout { .. } => true,
            BleError::OperationPending { .. } => true,
            BleError::NotConnected { .. } => true,
            BleError::FramingSequence { .. } => true,
            BleError::NotifyNotEnabled { .. } => true,
            BleError::ControlPoint { status, .. } => status.is_transient(),
            BleError::AttributeNotFound { .. } => false,
            BleError::Decode { .. } => false,
            BleError::UnsupportedFrameType { .. } => false,
            BleError::Pftp { .. } => false,
            BleError::InvalidArgument { .. } => false,
            BleError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            BleError::Disconnected { .. } => vec![
                "Keep the device within radio range",
                "Enable automatic reconnection in the SDK configuration",
                "Reopen the session once the device advertises again",
            ],
            BleError::Transport { .. } => vec![
                "Check that Bluetooth is powered on",
                "Verify the platform BLE permissions",
                "Retry the operation",
            ],
            BleError::AttributeNotFound { .. } => vec![
                "Verify the device model exposes this service",
                "Wait for service discovery to complete",
            ],
            BleError::NotifyNotEnabled { .. } => vec![
                "Wait until the session reports its clients ready",
                "Re-enable notifications on the characteristic",
            ],
            BleError::Decode { .. } => vec![
                "Check the device firmware version",
                "Capture the raw notification for analysis",
            ],
            BleError::UnsupportedFrameType { .. } => vec![
                "Request a different resolution or sample rate",
                "Update the SDK to a version that knows this frame type",
            ],
            BleError::ControlPoint { .. } => vec![
                "Query the measurement settings before starting a stream",
                "Stop the running measurement before starting a new one",
                "Remove the device from its charger",
            ],
            BleError::FramingSequence { .. } => vec![
                "Retry the request",
                "Move the device closer to reduce packet loss",
            ],
            BleError::Pftp { .. } => vec![
                "Check that the remote path exists",
                "Verify free disk space on the device",
            ],
            BleError::OperationPending { .. } => vec![
                "Await the in-flight operation before issuing another",
                "Serialize requests per device",
            ],
            BleError::InvalidArgument { .. } => vec![
                "Select values reported by the device settings query",
                "Check argument ranges",
            ],
            BleError::Timeout { .. } => vec![
                "Increase the timeout in the SDK configuration",
                "Check the link quality",
                "Verify the device is responsive",
            ],
            BleError::NotConnected { .. } => vec![
                "Open the session before issuing commands",
                "Wait for the session state to become open",
            ],
            BleError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Verify values are within documented ranges",
            ],
        }
    }

    /// Helper constructor for disconnection errors.
    pub fn disconnected(address: impl Into<String>) -> Self {
        BleError::Disconnected { address: address.into() }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        BleError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        BleError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for decode errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        BleError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for invalid argument errors.
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        BleError::InvalidArgument { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        BleError::Config { details: details.into(), source: None }
    }
}

impl From<serde_yaml_ng::Error> for BleError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        BleError::Config { details: err.to_string(), source: Some(Box::new(err)) }
    }
}
