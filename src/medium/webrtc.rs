//! WebRTC medium handler: generates a random peer id plus a
//! location hint and signals it out-of-band; dialing hands the peer id to a
//! signalling channel that yields a connected data channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::channel::{AsyncReadWrite, EndpointChannel};
use crate::medium::{HandlerError, InnerMediumHandler};
use crate::model::{CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::{UpgradePath, UpgradePathInfo};

const MAX_TRANSMIT_PACKET_SIZE: usize = 64 * 1024;
const PEER_ID_LEN: usize = 12;

/// The signalling surface a real WebRTC stack would provide.
#[async_trait]
pub trait WebRtcRadio: Send + Sync {
    /// Registers `peer_id` with the signalling channel so a remote peer can
    /// find it; returns the location hint to advertise alongside it.
    async fn register_peer_id(&self, peer_id: &str) -> Option<String>;
    fn unregister_peer_id(&self, peer_id: &str);
    async fn connect_to_peer(&self, peer_id: &str) -> Result<Box<dyn AsyncReadWrite>, HandlerError>;
}

pub struct WebRtcHandler<R> {
    radio: R,
    registered_peer_id: Mutex<Option<String>>,
}

impl<R: WebRtcRadio> WebRtcHandler<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            registered_peer_id: Mutex::new(None),
        }
    }

    fn generate_peer_id(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PEER_ID_LEN)
            .map(char::from)
            .collect()
    }
}

#[async_trait]
impl<R: WebRtcRadio> InnerMediumHandler for WebRtcHandler<R> {
    fn medium_tag(&self) -> Medium {
        Medium::WebRtc
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn handle_initialize_for_endpoint(
        &self,
        _upgrade_service_id: &ServiceId,
        _endpoint_id: &EndpointId,
    ) -> Option<UpgradePathInfo> {
        let existing = self.registered_peer_id.lock().clone();
        if let Some(peer_id) = existing {
            // Re-derive the location hint by re-registering; cheap and keeps
            // the handler stateless about anything but the id itself.
            let hint = self.radio.register_peer_id(&peer_id).await?;
            return Some(UpgradePathInfo::webrtc(peer_id, hint));
        }

        let peer_id = self.generate_peer_id();
        let hint = self.radio.register_peer_id(&peer_id).await?;
        *self.registered_peer_id.lock() = Some(peer_id.clone());
        Some(UpgradePathInfo::webrtc(peer_id, hint))
    }

    async fn create_upgraded_channel(
        &self,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: &UpgradePathInfo,
        _cancellation: &CancellationFlag,
    ) -> Result<EndpointChannel, HandlerError> {
        let UpgradePath::WebRtc { peer_id, .. } = &path_info.path else {
            return Err(HandlerError::DialFailed("not a WebRtc path".into()));
        };
        let socket = self.radio.connect_to_peer(peer_id).await?;
        Ok(EndpointChannel::new(
            socket,
            Medium::WebRtc,
            service_id.clone(),
            endpoint_id.clone(),
            MAX_TRANSMIT_PACKET_SIZE,
        ))
    }

    fn handle_revert_initiator_state_for_service(&self, _upgrade_service_id: &ServiceId) {
        if let Some(peer_id) = self.registered_peer_id.lock().take() {
            self.radio.unregister_peer_id(&peer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::{BaseMediumHandler, MediumHandler};
    use tokio::io::duplex;

    struct FakeRadio;

    #[async_trait]
    impl WebRtcRadio for FakeRadio {
        async fn register_peer_id(&self, _peer_id: &str) -> Option<String> {
            Some("us-west".into())
        }
        fn unregister_peer_id(&self, _peer_id: &str) {}
        async fn connect_to_peer(&self, _peer_id: &str) -> Result<Box<dyn AsyncReadWrite>, HandlerError> {
            let (a, _b) = duplex(1024);
            Ok(Box::new(a))
        }
    }

    #[tokio::test]
    async fn repeated_initialization_reuses_the_same_peer_id() {
        let handler = BaseMediumHandler::new(WebRtcHandler::new(FakeRadio));
        let service = "svc_UPGRADE".to_string();
        let first = handler
            .initialize_for_endpoint(&service, &"1".to_string())
            .await
            .unwrap();
        let second = handler
            .initialize_for_endpoint(&service, &"2".to_string())
            .await
            .unwrap();
        assert_eq!(first.path, second.path);
    }

    #[tokio::test]
    async fn peer_id_is_nonempty_and_alphanumeric() {
        let handler = WebRtcHandler::new(FakeRadio);
        let info = handler
            .handle_initialize_for_endpoint(&"svc_UPGRADE".to_string(), &"1".to_string())
            .await
            .unwrap();
        let UpgradePath::WebRtc { peer_id, .. } = info.path else {
            panic!("expected a WebRtc path");
        };
        assert_eq!(peer_id.len(), PEER_ID_LEN);
        assert!(peer_id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
