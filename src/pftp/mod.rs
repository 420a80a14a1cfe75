//! Polar file transfer over GATT
//!
//! [`rfc76`] fragments messages to the MTU, [`operation`] frames file
//! requests and queries, and [`PftpClient`] runs one exchange at a time.

use uuid::Uuid;

use crate::gatt::bluetooth_uuid;

mod client;
pub mod operation;
pub mod rfc76;

pub use client::PftpClient;
pub use operation::{Command, DirectoryEntry, DiskSpace, Operation};
pub use rfc76::{FragmentHeader, Reassembler};

/// PFTP service.
pub const PFTP_SERVICE: Uuid = bluetooth_uuid(0xFEEE);

/// Request/response characteristic (write + notify).
pub const PFTP_MTU_CHARACTERISTIC: Uuid = Uuid::from_u128(0xFB005C51_02E7_F387_1CAD_8ACD2D8DF0C8);
