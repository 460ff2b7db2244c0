//! Wifi Direct medium handler: the initiator becomes group
//! owner and emits the group's `DIRECT-`-prefixed SSID plus credentials; the
//! responder joins as a group client and later tears that association down.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{AsyncReadWrite, EndpointChannel};
use crate::medium::{HandlerError, InnerMediumHandler};
use crate::model::{CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::{UpgradePath, UpgradePathInfo};

const MAX_TRANSMIT_PACKET_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct GroupCredentials {
    pub ssid: String,
    pub password: String,
    pub port: u16,
    pub gateway: String,
    pub frequency: i32,
    pub supports_disabling_encryption: bool,
}

/// The group-owner surface a real Wifi Direct stack would provide.
#[async_trait]
pub trait WifiDirectRadio: Send + Sync {
    /// Forms a group and returns its credentials; the `ssid` must satisfy
    /// the `^DIRECT-[A-Za-z0-9]{2}.*$` pattern.
    async fn create_group(&self) -> Option<GroupCredentials>;
    fn remove_group(&self);
    async fn join_group(
        &self,
        credentials: &UpgradePath,
    ) -> Result<Box<dyn AsyncReadWrite>, HandlerError>;
    fn leave_group(&self);
}

pub struct WifiDirectHandler<R> {
    radio: R,
    hosting: Mutex<Option<GroupCredentials>>,
    joined_as_responder: Mutex<bool>,
}

impl<R: WifiDirectRadio> WifiDirectHandler<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            hosting: Mutex::new(None),
            joined_as_responder: Mutex::new(false),
        }
    }
}

#[async_trait]
impl<R: WifiDirectRadio> InnerMediumHandler for WifiDirectHandler<R> {
    fn medium_tag(&self) -> Medium {
        Medium::WifiDirect
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
                let started = self.radio.create_group().await?;
                *self.hosting.lock() = Some(started.clone());
                started
            }
        };
        Some(UpgradePathInfo::wifi_direct(
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
        if !matches!(path_info.path, UpgradePath::WifiDirect { .. }) {
            return Err(HandlerError::DialFailed("not a WifiDirect path".into()));
        }
        let socket = self.radio.join_group(&path_info.path).await?;
        *self.joined_as_responder.lock() = true;
        Ok(EndpointChannel::new(
            socket,
            Medium::WifiDirect,
            service_id.clone(),
            endpoint_id.clone(),
            MAX_TRANSMIT_PACKET_SIZE,
        ))
    }

    fn handle_revert_initiator_state_for_service(&self, _upgrade_service_id: &ServiceId) {
        self.radio.remove_group();
        *self.hosting.lock() = None;
    }

    fn revert_responder_state(&self, _service_id: &ServiceId) {
        if std::mem::take(&mut *self.joined_as_responder.lock()) {
            self.radio.leave_group();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::{BaseMediumHandler, MediumHandler};
    use crate::upgrade::validate;
    use tokio::io::duplex;

    struct FakeRadio;

    #[async_trait]
    impl WifiDirectRadio for FakeRadio {
        async fn create_group(&self) -> Option<GroupCredentials> {
            Some(GroupCredentials {
                ssid: "DIRECT-xy-nearby".into(),
                password: "password123".into(),
                port: 80,
                gateway: "192.168.49.1".into(),
                frequency: -1,
                supports_disabling_encryption: true,
            })
        }
        fn remove_group(&self) {}
        async fn join_group(
            &self,
            _credentials: &UpgradePath,
        ) -> Result<Box<dyn AsyncReadWrite>, HandlerError> {
            let (a, _b) = duplex(1024);
            Ok(Box::new(a))
        }
        fn leave_group(&self) {}
    }

    #[tokio::test]
    async fn generated_ssid_passes_validation() {
        let base = BaseMediumHandler::new(WifiDirectHandler::new(FakeRadio));
        let info = base
            .initialize_for_endpoint(&"svc_UPGRADE".to_string(), &"1".to_string())
            .await
            .unwrap();
        assert!(validate::validate(&info).is_ok());
    }

    #[tokio::test]
    async fn joining_then_reverting_clears_responder_state() {
        let handler = WifiDirectHandler::new(FakeRadio);
        let info = UpgradePathInfo::wifi_direct("DIRECT-xy-z", "password1", 1, "192.168.49.1", -1, true);
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
}
