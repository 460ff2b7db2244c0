//! Per-radio adapter contract the upgrade core consumes regardless of
//! medium.

pub mod base;
pub mod bluetooth;
pub mod webrtc;
pub mod wifi_direct;
pub mod wifi_hotspot;
pub mod wifi_lan;

use async_trait::async_trait;

use crate::channel::EndpointChannel;
use crate::model::{CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::UpgradePathInfo;

pub use base::BaseMediumHandler;

/// Errors a [`MediumHandler`] can surface. These bubble into
/// `nearby_bwu::Error` via [`crate::error::Error::Resource`] (a
/// `HandlerError::Cancelled` specifically is remapped to
/// [`crate::error::Error::Cancelled`] at the `BwuManager` boundary).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum HandlerError {
    #[error("medium refused to start accepting connections")]
    ListenFailed,
    #[error("peer device could not be resolved")]
    PeerUnresolved,
    #[error("dial attempt was cancelled")]
    Cancelled,
    #[error("dial attempt failed: {0}")]
    DialFailed(String),
}

/// The external capability set the upgrade core consumes regardless of
/// radio. Object-safe via `async_trait` so `BwuManager` can hold
/// `HashMap<Medium, Box<dyn MediumHandler>>`.
///
/// Implemented by [`BaseMediumHandler`], never directly by a concrete
/// per-medium type — the bookkeeping rule ("only the first endpoint for a
/// given `upgrade_service_id` actually starts the listener") is common to
/// every medium, so it lives in one place and concrete types
/// only provide [`InnerMediumHandler`].
#[async_trait]
pub trait MediumHandler: Send + Sync {
    fn medium_tag(&self) -> Medium;

    /// Whether this medium is currently usable on this device, via the
    /// per-handler availability probe.
    fn is_available(&self) -> bool;

    /// Brings up the medium in the listening role on `upgrade_service_id` if
    /// not already listening for it; returns `None` on failure to start.
    async fn initialize_for_endpoint(
        &self,
        upgrade_service_id: &ServiceId,
        endpoint_id: &EndpointId,
    ) -> Option<UpgradePathInfo>;

    /// Dials the peer described by `path_info`. `cancellation` is checked
    /// by the implementation at points where it is still cheap to abandon
    /// the dial; once set, a handler may return `HandlerError::Cancelled`
    /// instead of completing.
    async fn create_upgraded_channel(
        &self,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: &UpgradePathInfo,
        cancellation: &CancellationFlag,
    ) -> Result<EndpointChannel, HandlerError>;

    /// Releases `endpoint_id`'s claim on `upgrade_service_id`; stops the
    /// listener only once the last claim is released.
    fn revert_initiator_state(&self, upgrade_service_id: &ServiceId, endpoint_id: &EndpointId);

    /// Reverts every tracked `upgrade_service_id`, then clears bookkeeping.
    /// Used on shutdown, calling revert on every handler.
    fn revert_all(&self);

    /// For radios that require the responder to tear down state (Hotspot,
    /// WifiDirect): releases that state.
    fn revert_responder_state(&self, _service_id: &ServiceId) {}

    /// Optional per-medium cleanup hook run on endpoint disconnect.
    fn on_endpoint_disconnect(&self, _endpoint_id: &EndpointId) {}

    /// Requests cancellation of an in-flight `create_upgraded_channel` dial
    /// for `endpoint_id`. A no-op if no dial is in flight for that
    /// endpoint.
    fn cancel_dial(&self, _endpoint_id: &EndpointId) {}
}

/// The medium-specific logic a concrete handler (Bluetooth, WifiLan, ...)
/// must provide; [`BaseMediumHandler`] wraps one of these and adds the
/// common refcounted bookkeeping to produce a full [`MediumHandler`].
#[async_trait]
pub trait InnerMediumHandler: Send + Sync {
    fn medium_tag(&self) -> Medium;
    fn is_available(&self) -> bool;

    /// Medium-specific half of `initialize_for_endpoint`: actually starts
    /// the listener if not already running, returning the advertisement
    /// descriptor on success.
    async fn handle_initialize_for_endpoint(
        &self,
        upgrade_service_id: &ServiceId,
        endpoint_id: &EndpointId,
    ) -> Option<UpgradePathInfo>;

    async fn create_upgraded_channel(
        &self,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: &UpgradePathInfo,
        cancellation: &CancellationFlag,
    ) -> Result<EndpointChannel, HandlerError>;

    /// Invoked exactly once per `upgrade_service_id`, when its last endpoint
    /// claim is released.
    fn handle_revert_initiator_state_for_service(&self, upgrade_service_id: &ServiceId);

    fn revert_responder_state(&self, _service_id: &ServiceId) {}
    fn on_endpoint_disconnect(&self, _endpoint_id: &EndpointId) {}
    fn cancel_dial(&self, _endpoint_id: &EndpointId) {}
}
