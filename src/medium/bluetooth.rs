//! Bluetooth Classic medium handler: reads the local MAC
//! address and listens for RFCOMM accepts; dials a peer by MAC address plus
//! RFCOMM service name.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{AsyncReadWrite, EndpointChannel};
use crate::medium::{HandlerError, InnerMediumHandler};
use crate::model::{CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::{UpgradePath, UpgradePathInfo};

const MAX_TRANSMIT_PACKET_SIZE: usize = 4 * 1024;

/// The Bluetooth Classic surface a real stack would provide.
#[async_trait]
pub trait BluetoothRadio: Send + Sync {
    /// `None` if the adapter has no usable address (e.g. Bluetooth is off).
    fn local_mac_address(&self) -> Option<String>;
    /// Starts an RFCOMM server registered under `service_name`. Returns
    /// whether the server came up.
    async fn start_rfcomm_server(&self, service_name: &str) -> bool;
    fn stop_rfcomm_server(&self);
    async fn connect_to_mac(
        &self,
        mac_address: &str,
        service_name: &str,
    ) -> Result<Box<dyn AsyncReadWrite>, HandlerError>;
}

pub struct BluetoothHandler<R> {
    radio: R,
    listening: Mutex<bool>,
}

impl<R: BluetoothRadio> BluetoothHandler<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            listening: Mutex::new(false),
        }
    }
}

#[async_trait]
impl<R: BluetoothRadio> InnerMediumHandler for BluetoothHandler<R> {
    fn medium_tag(&self) -> Medium {
        Medium::Bluetooth
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn handle_initialize_for_endpoint(
        &self,
        upgrade_service_id: &ServiceId,
        _endpoint_id: &EndpointId,
    ) -> Option<UpgradePathInfo> {
        {
            let mut started = self.listening.lock();
            if !*started {
                if !self.radio.start_rfcomm_server(upgrade_service_id).await {
                    return None;
                }
                *started = true;
            }
        }
        let mac = self.radio.local_mac_address()?;
        Some(UpgradePathInfo::bluetooth(upgrade_service_id.clone(), mac))
    }

    async fn create_upgraded_channel(
        &self,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: &UpgradePathInfo,
        _cancellation: &CancellationFlag,
    ) -> Result<EndpointChannel, HandlerError> {
        let UpgradePath::Bluetooth {
            service_name,
            mac_address,
        } = &path_info.path
        else {
            return Err(HandlerError::DialFailed("not a Bluetooth path".into()));
        };
        let socket = self.radio.connect_to_mac(mac_address, service_name).await?;
        Ok(EndpointChannel::new(
            socket,
            Medium::Bluetooth,
            service_id.clone(),
            endpoint_id.clone(),
            MAX_TRANSMIT_PACKET_SIZE,
        ))
    }

    fn handle_revert_initiator_state_for_service(&self, _upgrade_service_id: &ServiceId) {
        self.radio.stop_rfcomm_server();
        *self.listening.lock() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::{BaseMediumHandler, MediumHandler};
    use tokio::io::duplex;

    struct FakeRadio;

    #[async_trait]
    impl BluetoothRadio for FakeRadio {
        fn local_mac_address(&self) -> Option<String> {
            Some("AA:BB:CC:DD:EE:FF".into())
        }
        async fn start_rfcomm_server(&self, _service_name: &str) -> bool {
            true
        }
        fn stop_rfcomm_server(&self) {}
        async fn connect_to_mac(
            &self,
            _mac_address: &str,
            _service_name: &str,
        ) -> Result<Box<dyn AsyncReadWrite>, HandlerError> {
            let (a, _b) = duplex(1024);
            Ok(Box::new(a))
        }
    }

    #[tokio::test]
    async fn initialize_returns_the_local_mac_address() {
        let handler = BaseMediumHandler::new(BluetoothHandler::new(FakeRadio));
        let info = handler
            .initialize_for_endpoint(&"svc_UPGRADE".to_string(), &"1".to_string())
            .await
            .unwrap();
        assert!(matches!(
            info.path,
            UpgradePath::Bluetooth { ref mac_address, .. } if mac_address == "AA:BB:CC:DD:EE:FF"
        ));
    }

    #[tokio::test]
    async fn radio_with_no_address_fails_initialization() {
        struct NoAddressRadio;
        #[async_trait]
        impl BluetoothRadio for NoAddressRadio {
            fn local_mac_address(&self) -> Option<String> {
                None
            }
            async fn start_rfcomm_server(&self, _service_name: &str) -> bool {
                true
            }
            fn stop_rfcomm_server(&self) {}
            async fn connect_to_mac(
                &self,
                _mac_address: &str,
                _service_name: &str,
            ) -> Result<Box<dyn AsyncReadWrite>, HandlerError> {
                unreachable!()
            }
        }

        let handler = BaseMediumHandler::new(BluetoothHandler::new(NoAddressRadio));
        let info = handler
            .initialize_for_endpoint(&"svc_UPGRADE".to_string(), &"1".to_string())
            .await;
        assert!(info.is_none());
    }
}
