//! Wifi Hotspot medium handler: the initiator starts a local
//! access point and emits its credentials; the responder joins that AP as a
//! client, then releases the association once the upgrade completes.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{AsyncReadWrite, EndpointChannel};
use crate::medium::{HandlerError, InnerMediumHandler};
use crate::model::{CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::{UpgradePath, UpgradePathInfo};

const MAX_TRANSMIT_PACKET_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct HotspotCredentials {
    pub ssid: String,
    pub password: String,
    pub port: u16,
    pub gateway: String,
    pub frequency: i32,
    pub supports_disabling_encryption: bool,
}

/// The access-point surface a real Wifi Hotspot stack would provide.
#[async_trait]
pub trait WifiHotspotRadio: Send + Sync {
    async fn start_hotspot(&self) -> Option<HotspotCredentials>;
    fn stop_hotspot(&self);
    async fn join_hotspot(
        &self,
        credentials: &UpgradePath,
    ) -> Result<Box<dyn AsyncReadWrite>, HandlerError>;
    /// Disconnects this device's client-mode association with a hotspot it
    /// previously joined as responder.
    fn leave_hotspot(&self);
}

pub struct WifiHotspotHandler<R> {
    radio: R,
    hosting: Mutex<Option<HotspotCredentials>>,
    joined_as_responder: Mutex<bool>,
}

impl<R: WifiHotspotRadio> WifiHotspotHandler<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            hosting: Mutex::new(None),
            joined_as_responder: Mutex::new(false),
        }
    }
}

#[async_trait]
impl<R: WifiHotspotRadio> InnerMediumHandler for WifiHotspotHandler<R> {
    fn medium_tag(&self) -> Medium {
        Medium::WifiHotspot
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn handle_initialize_for_endpoint(
        &self,
        _upgrade_service_id: &ServiceId,
        _endpoint_id: &EndpointId,
    ) -> Option<UpgradePathInfo> {
        let cached = self.hosting.lock().clone();
        let creds = match cached {
            Some(existing) => existing,
            None => {
                let started = self.radio.start_hotspot().await?;
                *self.hosting.lock() = Some(started.clone());
                started
            }
        };
        Some(UpgradePathInfo::wifi_hotspot(
            creds.ssid,
            creds.password,
            creds.port,
            creds.gateway,
            creds.frequency,
            creds.supports_disabling_encryption,
        ))
    }

    async fn create_upgraded_channel(
        &self,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: &UpgradePathInfo,
        _cancellation: &CancellationFlag,
    ) -> Result<EndpointChannel, HandlerError> {
        if !matches!(path_info.path, UpgradePath::WifiHotspot { .. }) {
            return Err(HandlerError::DialFailed("not a WifiHotspot path".into()));
        }
        let socket = self.radio.join_hotspot(&path_info.path).await?;
        *self.joined_as_responder.lock() = true;
        Ok(EndpointChannel::new(
            socket,
            Medium::WifiHotspot,
            service_id.clone(),
            endpoint_id.clone(),
            MAX_TRANSMIT_PACKET_SIZE,
        ))
    }

    fn handle_revert_initiator_state_for_service(&self, _upgrade_service_id: &ServiceId) {
        self.radio.stop_hotspot();
        *self.hosting.lock() = None;
    }

    fn revert_responder_state(&self, _service_id: &ServiceId) {
        if std::mem::take(&mut *self.joined_as_responder.lock()) {
            self.radio.leave_hotspot();
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
    impl WifiHotspotRadio for FakeRadio {
        async fn start_hotspot(&self) -> Option<HotspotCredentials> {
            Some(HotspotCredentials {
                ssid: "nearby-hotspot".into(),
                password: "password123".into(),
                port: 443,
                gateway: "192.168.43.1".into(),
                frequency: 2412,
                supports_disabling_encryption: true,
            })
        }
        fn stop_hotspot(&self) {}
        async fn join_hotspot(
            &self,
            _credentials: &UpgradePath,
        ) -> Result<Box<dyn AsyncReadWrite>, HandlerError> {
            let (a, _b) = duplex(1024);
            Ok(Box::new(a))
        }
        fn leave_hotspot(&self) {}
    }

    #[tokio::test]
    async fn joining_then_reverting_clears_responder_state() {
        let handler = WifiHotspotHandler::new(FakeRadio);
        let info = UpgradePathInfo::wifi_hotspot("ssid", "password1", 1, "192.168.43.1", 0, true);
        handler
            .create_upgraded_channel(
                &"svc".to_string(),
                &"1".to_string(),
                &info,
                &CancellationFlag::new(),
            )
            .await
            .unwrap();
        assert!(*handler.joined_as_responder.lock());
        handler.revert_responder_state(&"svc".to_string());
        assert!(!*handler.joined_as_responder.lock());
    }

    #[tokio::test]
    async fn only_the_first_initialize_starts_the_hotspot() {
        let base = BaseMediumHandler::new(WifiHotspotHandler::new(FakeRadio));
        let service = "svc_UPGRADE".to_string();
        let first = base.initialize_for_endpoint(&service, &"1".to_string()).await;
        let second = base.initialize_for_endpoint(&service, &"2".to_string()).await;
        assert_eq!(first, second);
    }
}
