//! Polar Measurement Data protocol
//!
//! PMD is a control point plus a data characteristic on one vendor service:
//!
//! - [`control_point`] correlates commands with device responses
//! - [`frame`] decodes streamed data frames into typed samples
//! - [`delta`] unpacks delta-compressed payloads
//! - [`timestamps`] rebuilds per-sample timestamps from frame timestamps
//! - [`PmdClient`] combines them into the operations an application uses

use uuid::Uuid;

mod client;
pub mod control_point;
pub mod delta;
pub mod frame;
pub mod timestamps;

pub use client::{PmdClient, PmdDataEvent};
pub use control_point::{ControlPoint, ControlPointResponse, PmdOpCode, PmdResponseCode};
pub use frame::{FrameHeader, StreamDecoder};

/// PMD vendor service.
pub const PMD_SERVICE: Uuid = Uuid::from_u128(0xFB005C80_02E7_F387_1CAD_8ACD2D8DF0C8);

/// Control point characteristic (write + notify).
pub const PMD_CONTROL_POINT: Uuid = Uuid::from_u128(0xFB005C81_02E7_F387_1CAD_8ACD2D8DF0C8);

/// Data characteristic (notify).
pub const PMD_DATA: Uuid = Uuid::from_u128(0xFB005C82_02E7_F387_1CAD_8ACD2D8DF0C8);
