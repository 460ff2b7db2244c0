//! Bandwidth-upgrade core and Presence advertisement codec for a
//! peer-to-peer proximity connectivity stack.
//!
//! Two mostly-independent halves live in this crate:
//!
//! - [`bwu`] and its supporting [`upgrade`], [`medium`], [`channel`] and
//!   [`wire`] modules implement the Bandwidth-Upgrade (BWU) state machine:
//!   migrating an already-connected endpoint from a low-bandwidth medium
//!   (Bluetooth, BLE) to a faster one (Wifi LAN, Wifi Hotspot, Wifi Direct,
//!   WebRTC) without dropping the connection.
//! - [`advertisement`] implements the Presence BLE advertisement codec:
//!   Data Elements, the packed Action word, LDT encryption, and scan-side
//!   filtering.
//!
//! [`error`] defines the crate-wide error taxonomy both halves funnel into;
//! [`telemetry`] defines the ambient, externally-dispatched attempt-record
//! shape both halves report through.

pub mod advertisement;
pub mod bwu;
pub mod bytes;
pub mod channel;
pub mod error;
pub mod medium;
pub mod model;
pub mod telemetry;
pub mod upgrade;
pub mod wire;

pub use bwu::{BackoffPolicy, BwuError, BwuManager, BwuManagerConfig};
pub use error::{Error, Result};
pub use model::{CancellationFlag, EndpointId, Medium, ServiceId, TxPowerLevel};
