//! PMD control point command/response protocol
//!
//! One command may be outstanding per client. Commands are written to the
//! control point characteristic as `[opcode, params...]` and the device
//! answers with a notification on the same characteristic:
//!
//! ```text
//! [0xF0][opcode][measurement type][status][more][params...]
//! ```
//!
//! While `more` is non-zero the following notifications are continuations
//! of the form `[more][params...]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{PMD_CONTROL_POINT, PMD_SERVICE};
use crate::codec;
use crate::gatt::GattLink;
use crate::{BleError, Result};

/// Marker byte opening every control point response.
pub const RESPONSE_CODE: u8 = 0xF0;

/// Control point opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum PmdOpCode {
    GetMeasurementSettings,
    RequestMeasurementStart,
    StopMeasurement,
    GetSdkModeSettings,
    GetMeasurementStatus,
    GetSdkModeStatus,
    GetOfflineRecordingTriggerStatus,
    SetOfflineRecordingTriggerMode,
    SetOfflineRecordingTriggerSettings,
}

impl PmdOpCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::GetMeasurementSettings),
            2 => Some(Self::RequestMeasurementStart),
            3 => Some(Self::StopMeasurement),
            4 => Some(Self::GetSdkModeSettings),
            5 => Some(Self::GetMeasurementStatus),
            6 => Some(Self::GetSdkModeStatus),
            7 => Some(Self::GetOfflineRecordingTriggerStatus),
            8 => Some(Self::SetOfflineRecordingTriggerMode),
            9 => Some(Self::SetOfflineRecordingTriggerSettings),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::GetMeasurementSettings => 1,
            Self::RequestMeasurementStart => 2,
            Self::StopMeasurement => 3,
            Self::GetSdkModeSettings => 4,
            Self::GetMeasurementStatus => 5,
            Self::GetSdkModeStatus => 6,
            Self::GetOfflineRecordingTriggerStatus => 7,
            Self::SetOfflineRecordingTriggerMode => 8,
            Self::SetOfflineRecordingTriggerSettings => 9,
        }
    }
}

/// Status reported by the device for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum PmdResponseCode {
    Success,
    InvalidOpCode,
    InvalidMeasurementType,
    NotSupported,
    InvalidLength,
    InvalidParameter,
    AlreadyInState,
    InvalidResolution,
    InvalidSampleRate,
    InvalidRange,
    InvalidMtu,
    InvalidNumberOfChannels,
    InvalidState,
    DeviceInCharger,
    DiskFull,
    Unknown(u8),
}

impl PmdResponseCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Success,
            1 => Self::InvalidOpCode,
            2 => Self::InvalidMeasurementType,
            3 => Self::NotSupported,
            4 => Self::InvalidLength,
            5 => Self::InvalidParameter,
            6 => Self::AlreadyInState,
            7 => Self::InvalidResolution,
            8 => Self::InvalidSampleRate,
            9 => Self::InvalidRange,
            10 => Self::InvalidMtu,
            11 => Self::InvalidNumberOfChannels,
            12 => Self::InvalidState,
            13 => Self::DeviceInCharger,
            14 => Self::DiskFull,
            other => Self::Unknown(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Status that may clear without changing the request.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::AlreadyInState | Self::InvalidState | Self::DeviceInCharger)
    }
}

impl fmt::Display for PmdResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::InvalidOpCode => write!(f, "invalid op code"),
            Self::InvalidMeasurementType => write!(f, "invalid measurement type"),
            Self::NotSupported => write!(f, "not supported"),
            Self::InvalidLength => write!(f, "invalid length"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::AlreadyInState => write!(f, "already in state"),
            Self::InvalidResolution => write!(f, "invalid resolution"),
            Self::InvalidSampleRate => write!(f, "invalid sample rate"),
            Self::InvalidRange => write!(f, "invalid range"),
            Self::InvalidMtu => write!(f, "invalid MTU"),
            Self::InvalidNumberOfChannels => write!(f, "invalid number of channels"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::DeviceInCharger => write!(f, "device in charger"),
            Self::DiskFull => write!(f, "disk full"),
            Self::Unknown(code) => write!(f, "unknown status {}", code),
        }
    }
}

/// A complete control point response, continuations included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPointResponse {
    pub opcode: u8,
    pub measurement_type: u8,
    pub status: PmdResponseCode,
    pub more: bool,
    pub parameters: Vec<u8>,
}

impl ControlPointResponse {
    /// Parse the first notification of a response.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let marker = codec::byte_at(data, 0, "control point response")?;
        if marker != RESPONSE_CODE {
            return Err(BleError::decode(
                "control point response",
                format!("expected response code 0x{:02X}, got 0x{:02X}", RESPONSE_CODE, marker),
            ));
        }
        let opcode = codec::byte_at(data, 1, "control point response opcode")?;
        let measurement_type = codec::byte_at(data, 2, "control point response type")?;
        let status = PmdResponseCode::from_byte(codec::byte_at(data, 3, "control point response status")?);
        // Error responses may stop after the status byte
        let more = data.get(4).is_some_and(|b| *b != 0);
        let parameters = data.get(5..).map(<[u8]>::to_vec).unwrap_or_default();
        Ok(Self { opcode, measurement_type, status, more, parameters })
    }

    /// Append a `[more][params...]` continuation.
    pub fn append_continuation(&mut self, data: &[u8]) -> Result<()> {
        let more = codec::byte_at(data, 0, "control point continuation")?;
        self.more = more != 0;
        self.parameters.extend_from_slice(&data[1..]);
        Ok(())
    }
}

enum State {
    Idle,
    Awaiting {
        opcode: PmdOpCode,
        generation: u64,
        reply: oneshot::Sender<Result<ControlPointResponse>>,
        partial: Option<ControlPointResponse>,
    },
}

struct Inner {
    state: State,
    generation: u64,
}

/// Idle/awaiting-response state machine of one control point.
pub struct ControlPoint {
    inner: Mutex<Inner>,
}

impl Default for ControlPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPoint {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { state: State::Idle, generation: 0 }) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.lock().state, State::Idle)
    }

    /// Send a command and wait for its response.
    ///
    /// Fails without writing when another command is outstanding. A non-success
    /// device status becomes [`BleError::ControlPoint`]. The state returns to
    /// idle on every exit path, including when this future is dropped.
    pub async fn execute(
        &self,
        link: &GattLink,
        timeout: Duration,
        opcode: PmdOpCode,
        params: &[u8],
    ) -> Result<ControlPointResponse> {
        let (generation, reply) = self.begin(opcode)?;
        let _reset = ResetOnExit { control_point: self, generation };

        let mut packet = Vec::with_capacity(1 + params.len());
        packet.push(opcode.to_byte());
        packet.extend_from_slice(params);

        debug!(address = link.address(), opcode = ?opcode, len = packet.len(), "Sending control point command");
        link.write(PMD_SERVICE, PMD_CONTROL_POINT, &packet, true).await?;

        let response = match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(BleError::disconnected(link.address())),
            Err(_) => {
                warn!(address = link.address(), opcode = ?opcode, ?timeout, "Control point response timed out");
                return Err(BleError::Timeout { duration: timeout });
            }
        };

        if !response.status.is_success() {
            debug!(address = link.address(), opcode = ?opcode, status = %response.status, "Command rejected");
            return Err(BleError::ControlPoint { opcode, status: response.status });
        }
        Ok(response)
    }

    fn begin(&self, opcode: PmdOpCode) -> Result<(u64, oneshot::Receiver<Result<ControlPointResponse>>)> {
        let mut inner = self.lock();
        if !matches!(inner.state, State::Idle) {
            return Err(BleError::OperationPending { operation: "control point command" });
        }
        inner.generation += 1;
        let generation = inner.generation;
        let (reply, rx) = oneshot::channel();
        inner.state = State::Awaiting { opcode, generation, reply, partial: None };
        Ok((generation, rx))
    }

    /// Feed a control point notification.
    pub fn on_notification(&self, data: &[u8]) {
        let mut inner = self.lock();
        let State::Awaiting { opcode, partial, .. } = &mut inner.state else {
            warn!(len = data.len(), "Control point notification with no pending command, dropped");
            return;
        };

        let outcome = match partial.take() {
            None => match ControlPointResponse::parse(data) {
                Ok(response) if response.opcode != opcode.to_byte() => {
                    warn!(
                        expected = opcode.to_byte(),
                        found = response.opcode,
                        "Control point response for another command, dropped"
                    );
                    return;
                }
                other => other,
            },
            Some(mut response) => response.append_continuation(data).map(|_| response),
        };

        match outcome {
            Ok(response) if response.more => *partial = Some(response),
            other => Self::complete(&mut inner, other),
        }
    }

    /// Fail the outstanding command, if any.
    pub fn fail_pending(&self, error: BleError) {
        let mut inner = self.lock();
        if matches!(inner.state, State::Awaiting { .. }) {
            debug!(error = %error, "Failing pending control point command");
            Self::complete(&mut inner, Err(error));
        }
    }

    fn complete(inner: &mut Inner, result: Result<ControlPointResponse>) {
        if let State::Awaiting { reply, .. } = std::mem::replace(&mut inner.state, State::Idle) {
            // Receiver gone means the caller was cancelled
            let _ = reply.send(result);
        }
    }

    fn reset(&self, generation: u64) {
        let mut inner = self.lock();
        if matches!(inner.state, State::Awaiting { generation: g, .. } if g == generation) {
            inner.state = State::Idle;
        }
    }
}

struct ResetOnExit<'a> {
    control_point: &'a ControlPoint,
    generation: u64,
}

impl Drop for ResetOnExit<'_> {
    fn drop(&mut self) {
        self.control_point.reset(self.generation);
    }
}
