//! Per-endpoint upgrade session state.

use std::sync::Arc;
use std::time::Duration;

use crate::channel::EndpointChannel;
use crate::model::Medium;

/// The five states an endpoint's upgrade session can be in. A failed or
/// aborted upgrade resets straight back to `Idle` via
/// [`Session::reset_to_idle`] rather than passing through a distinct
/// terminal failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initiated,
    AwaitingLastWriteFromPeer,
    AwaitingSafeToCloseFromPeer,
    Complete,
}

/// Per-endpoint upgrade state, owned by [`crate::bwu::BwuManager`] and
/// driven by [`crate::upgrade::UpgradeProtocol`].
pub struct Session {
    pub state: SessionState,
    /// The channel currently in active use for payload traffic.
    pub active_channel: Arc<EndpointChannel>,
    /// Set while an upgrade is draining the old channel; cleared once the
    /// `SAFE_TO_CLOSE` exchange completes (invariant 2).
    pub previous_channel: Option<Arc<EndpointChannel>>,
    pub chosen_medium: Option<Medium>,
    pub attempted_mediums: Vec<Medium>,
    pub retry_delay: Duration,
    /// Latched `true` the moment a peer's `LAST_WRITE_TO_PRIOR_CHANNEL` is
    /// observed, even if it arrives before our own new channel has been
    /// registered as active.
    pub successfully_drained_prior: bool,
    /// As initiator: whether the `UpgradePathInfo` we generated offered
    /// `CLIENT_INTRODUCTION_ACK`, so the handler for an inbound
    /// `CLIENT_INTRODUCTION` knows whether to write one back. Not part of
    /// the field list verbatim, but required to implement it: the
    /// flag lives on the `UpgradePathInfo` we sent, which this session does
    /// not otherwise retain.
    pub supports_client_introduction_ack: bool,
}

impl Session {
    /// A freshly-created endpoint, not mid-upgrade.
    pub fn new(active_channel: Arc<EndpointChannel>, initial_delay: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            active_channel,
            previous_channel: None,
            chosen_medium: None,
            attempted_mediums: Vec::new(),
            retry_delay: initial_delay,
            successfully_drained_prior: false,
            supports_client_introduction_ack: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SessionState::Idle)
    }

    pub fn is_mid_upgrade(&self) -> bool {
        !matches!(self.state, SessionState::Idle | SessionState::Complete)
    }

    /// Resets to idle on the active channel, discarding any in-progress
    /// upgrade bookkeeping. Used after a failed/aborted/duplicate upgrade.
    pub fn reset_to_idle(&mut self) {
        self.state = SessionState::Idle;
        self.previous_channel = None;
        self.chosen_medium = None;
        self.successfully_drained_prior = false;
    }
}
