//! Wifi LAN medium handler: listens and emits `(ip, port)` once
//! the listener socket actually exists; dials a peer's `(ip, port)`.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{AsyncReadWrite, EndpointChannel};
use crate::medium::{HandlerError, InnerMediumHandler};
use crate::model::{CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::{UpgradePath, UpgradePathInfo};

const MAX_TRANSMIT_PACKET_SIZE: usize = 16 * 1024;

/// The socket surface a real Wifi LAN stack would provide; injected so
/// tests can supply an in-memory fake instead of opening real TCP sockets
/// (: concrete radio drivers are out of scope).
#[async_trait]
pub trait WifiLanRadio: Send + Sync {
    /// Starts listening, returning the bound `(ip, port)` once the listener
    /// socket exists. `None` on failure to bind.
    async fn start_listening(&self) -> Option<(String, u16)>;
    fn stop_listening(&self);
    async fn dial(&self, ip_address: &str, port: u16) -> Result<Box<dyn AsyncReadWrite>, HandlerError>;
}

pub struct WifiLanHandler<R> {
    radio: R,
    /// Cached `(ip, port)` once the listener is up; `None` while not
    /// listening. Credential lookup for advertising over this listener (out
    /// of scope here) must follow listener creation, not precede it, since
    /// the bound port isn't known until `start_listening` returns.
    listening: Mutex<Option<(String, u16)>>,
}

impl<R: WifiLanRadio> WifiLanHandler<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            listening: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<R: WifiLanRadio> InnerMediumHandler for WifiLanHandler<R> {
    fn medium_tag(&self) -> Medium {
        Medium::WifiLan
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn handle_initialize_for_endpoint(
        &self,
        _upgrade_service_id: &ServiceId,
        _endpoint_id: &EndpointId,
    ) -> Option<UpgradePathInfo> {
        let cached = self.listening.lock().clone();
        let (ip, port) = match cached {
            Some(existing) => existing,
            None => {
                let started = self.radio.start_listening().await?;
                *self.listening.lock() = Some(started.clone());
                started
            }
        };
        Some(UpgradePathInfo::wifi_lan(ip, port))
    }

    async fn create_upgraded_channel(
        &self,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: &UpgradePathInfo,
        cancellation: &CancellationFlag,
    ) -> Result<EndpointChannel, HandlerError> {
        if cancellation.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        let UpgradePath::WifiLan { ip_address, port } = &path_info.path else {
            return Err(HandlerError::DialFailed("not a WifiLan path".into()));
        };
        let socket = self.radio.dial(ip_address, *port).await?;
        if cancellation.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        Ok(EndpointChannel::new(
            socket,
            Medium::WifiLan,
            service_id.clone(),
            endpoint_id.clone(),
            MAX_TRANSMIT_PACKET_SIZE,
        ))
    }

    fn handle_revert_initiator_state_for_service(&self, _upgrade_service_id: &ServiceId) {
        self.radio.stop_listening();
        *self.listening.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::{BaseMediumHandler, MediumHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::duplex;

    struct FakeRadio {
        start_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WifiLanRadio for FakeRadio {
        async fn start_listening(&self) -> Option<(String, u16)> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Some(("10.0.0.9".into(), 4242))
        }
        fn stop_listening(&self) {}
        async fn dial(&self, _ip_address: &str, _port: u16) -> Result<Box<dyn AsyncReadWrite>, HandlerError> {
            let (a, _b) = duplex(1024);
            Ok(Box::new(a))
        }
    }

    #[tokio::test]
    async fn second_endpoint_does_not_restart_the_listener() {
        let start_calls = Arc::new(AtomicUsize::new(0));
        let handler = WifiLanHandler::new(FakeRadio {
            start_calls: start_calls.clone(),
        });
        let base = BaseMediumHandler::new(handler);

        let service = "svc_UPGRADE".to_string();
        let first = base.initialize_for_endpoint(&service, &"1".to_string()).await;
        let second = base.initialize_for_endpoint(&service, &"2".to_string()).await;

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_flag_short_circuits_the_dial() {
        let start_calls = Arc::new(AtomicUsize::new(0));
        let handler = WifiLanHandler::new(FakeRadio {
            start_calls: start_calls.clone(),
        });
        let path_info = UpgradePathInfo::wifi_lan("10.0.0.9".to_string(), 4242);
        let cancellation = CancellationFlag::new();
        cancellation.cancel();

        let result = handler
            .create_upgraded_channel(&"svc".to_string(), &"1".to_string(), &path_info, &cancellation)
            .await;

        assert_eq!(result.err(), Some(HandlerError::Cancelled));
    }
}
