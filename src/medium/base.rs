//! Bookkeeping common to every medium handler, grounded on
//! `base_bwu_handler.{h,cc}`'s `upgrade_service_id_to_active_endpoint_ids_`
//! map and its insert/erase/revert-on-empty rule.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::channel::EndpointChannel;
use crate::medium::{HandlerError, InnerMediumHandler, MediumHandler};
use crate::model::{is_wrapped, CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::UpgradePathInfo;

/// Wraps a concrete [`InnerMediumHandler`] with the refcounted
/// `upgrade_service_id -> {endpoint_id}` bookkeeping every medium shares:
/// every tracked id has at least one endpoint, and revert either shrinks
/// the set or removes the entry entirely.
pub struct BaseMediumHandler<H> {
    inner: H,
    active: Mutex<HashMap<ServiceId, HashSet<EndpointId>>>,
}

impl<H: InnerMediumHandler> BaseMediumHandler<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: InnerMediumHandler> MediumHandler for BaseMediumHandler<H> {
    fn medium_tag(&self) -> Medium {
        self.inner.medium_tag()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn initialize_for_endpoint(
        &self,
        upgrade_service_id: &ServiceId,
        endpoint_id: &EndpointId,
    ) -> Option<UpgradePathInfo> {
        let path_info = self
            .inner
            .handle_initialize_for_endpoint(upgrade_service_id, endpoint_id)
            .await;
        if path_info.is_some() {
            self.active
                .lock()
                .entry(upgrade_service_id.clone())
                .or_default()
                .insert(endpoint_id.clone());
        }
        path_info
    }

    async fn create_upgraded_channel(
        &self,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: &UpgradePathInfo,
        cancellation: &CancellationFlag,
    ) -> Result<EndpointChannel, HandlerError> {
        self.inner
            .create_upgraded_channel(service_id, endpoint_id, path_info, cancellation)
            .await
    }

    fn revert_initiator_state(&self, upgrade_service_id: &ServiceId, endpoint_id: &EndpointId) {
        if !is_wrapped(upgrade_service_id) {
            warn!(%upgrade_service_id, "revert called with a non-upgrade service id; ignoring");
            return;
        }

        let mut active = self.active.lock();
        let Some(endpoints) = active.get_mut(upgrade_service_id) else {
            return;
        };
        if endpoints.is_empty() {
            return;
        }
        endpoints.remove(endpoint_id);
        if endpoints.is_empty() {
            active.remove(upgrade_service_id);
            drop(active);
            self.inner.handle_revert_initiator_state_for_service(upgrade_service_id);
        }
    }

    fn revert_all(&self) {
        let ids: Vec<ServiceId> = {
            let mut active = self.active.lock();
            active.drain().map(|(id, _)| id).collect()
        };
        for id in ids {
            self.inner.handle_revert_initiator_state_for_service(&id);
        }
    }

    fn revert_responder_state(&self, service_id: &ServiceId) {
        self.inner.revert_responder_state(service_id);
    }

    fn on_endpoint_disconnect(&self, endpoint_id: &EndpointId) {
        self.inner.on_endpoint_disconnect(endpoint_id);
    }

    fn cancel_dial(&self, endpoint_id: &EndpointId) {
        self.inner.cancel_dial(endpoint_id);
    }
}
