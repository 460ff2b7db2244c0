//! Per-endpoint upgrade state machine: the five-message handshake that
//! migrates an endpoint from its current medium to a higher-bandwidth one.

pub mod path_info;
pub mod protocol;
pub mod session;
pub mod validate;

pub use path_info::{ClientIntroduction, UpgradePath, UpgradePathInfo};
pub use protocol::{ResponderOutcome, UpgradeError, UpgradeProtocol, UpgradeProtocolConfig};
pub use session::{Session, SessionState};
pub use validate::ValidationError;
