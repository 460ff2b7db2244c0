//! The single serial work queue behind [`super::BwuManager`]. All
//! session-map mutation happens inside [`Actor::run`]; every other piece of
//! the crate only reaches this state through [`Command`]s.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::channel::{CloseReason, EndpointChannel};
use crate::medium::MediumHandler;
use crate::model::{is_wrapped, wrap_service_id, CancellationFlag, EndpointId, Medium, ServiceId};
use crate::telemetry::{AttemptOutcome, Sink, UpgradeAttemptRecord};
use crate::upgrade::{
    ClientIntroduction, ResponderOutcome, Session, UpgradeError, UpgradePathInfo, UpgradeProtocol,
};
use crate::wire::BwuNegotiationEvent;

use super::{BwuError, BwuManagerConfig};

pub(super) enum Command {
    RegisterEndpoint {
        endpoint_id: EndpointId,
        service_id: ServiceId,
        active_channel: Arc<EndpointChannel>,
        reply: oneshot::Sender<()>,
    },
    InitiateBwu {
        endpoint_id: EndpointId,
        preference_list: Vec<Medium>,
        reply: oneshot::Sender<Result<(), BwuError>>,
    },
    OnIncomingFrame {
        endpoint_id: EndpointId,
        event: BwuNegotiationEvent,
        reply: oneshot::Sender<Result<(), BwuError>>,
    },
    OnClientIntroduction {
        endpoint_id: EndpointId,
        new_channel: Arc<EndpointChannel>,
        intro: ClientIntroduction,
        reply: oneshot::Sender<Result<(), BwuError>>,
    },
    OnEndpointDisconnect {
        endpoint_id: EndpointId,
        reply: oneshot::Sender<()>,
    },
    /// Requests cancellation of an in-flight dial for `endpoint_id`; a
    /// no-op if no upgrade is in progress for it.
    CancelDial {
        endpoint_id: EndpointId,
        reply: oneshot::Sender<()>,
    },
    /// Re-posted by a sleeping timer task; timer callbacks only re-post to
    /// the work queue rather than touching session state directly.
    Retry {
        endpoint_id: EndpointId,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Per-endpoint state the actor owns. `ClientId` from 's
/// `in_progress_upgrades: endpoint_id -> client` is not modeled — the
/// client/service split is out of scope — so `in_progress` below
/// is a set rather than a map.
struct EndpointState {
    service_id: ServiceId,
    upgrade_service_id: ServiceId,
    session: Session,
    preference_list: Vec<Medium>,
    cancellation: CancellationFlag,
}

pub(super) struct Actor {
    handlers: HashMap<Medium, Box<dyn MediumHandler>>,
    endpoints: HashMap<EndpointId, EndpointState>,
    in_progress: HashSet<EndpointId>,
    config: BwuManagerConfig,
    protocol: UpgradeProtocol,
    telemetry: Arc<dyn Sink>,
    self_tx: mpsc::Sender<Command>,
}

impl Actor {
    pub(super) fn new(
        handlers: HashMap<Medium, Box<dyn MediumHandler>>,
        config: BwuManagerConfig,
        telemetry: Arc<dyn Sink>,
        self_tx: mpsc::Sender<Command>,
    ) -> Self {
        let protocol = UpgradeProtocol::new(config.protocol.clone());
        Self {
            handlers,
            endpoints: HashMap::new(),
            in_progress: HashSet::new(),
            config,
            protocol,
            telemetry,
            self_tx,
        }
    }

    pub(super) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::RegisterEndpoint {
                    endpoint_id,
                    service_id,
                    active_channel,
                    reply,
                } => {
                    self.register_endpoint(endpoint_id, service_id, active_channel);
                    let _ = reply.send(());
                }
                Command::InitiateBwu {
                    endpoint_id,
                    preference_list,
                    reply,
                } => {
                    let result = self.handle_initiate(endpoint_id, preference_list).await;
                    let _ = reply.send(result);
                }
                Command::OnIncomingFrame {
                    endpoint_id,
                    event,
                    reply,
                } => {
                    let result = self.handle_incoming_frame(endpoint_id, event).await;
                    let _ = reply.send(result);
                }
                Command::OnClientIntroduction {
                    endpoint_id,
                    new_channel,
                    intro,
                    reply,
                } => {
                    let result = self.handle_client_introduction(endpoint_id, new_channel, intro).await;
                    let _ = reply.send(result);
                }
                Command::OnEndpointDisconnect { endpoint_id, reply } => {
                    self.handle_disconnect(&endpoint_id);
                    let _ = reply.send(());
                }
                Command::CancelDial { endpoint_id, reply } => {
                    self.handle_cancel_dial(&endpoint_id);
                    let _ = reply.send(());
                }
                Command::Retry { endpoint_id } => {
                    self.handle_retry(endpoint_id).await;
                }
                Command::Shutdown { reply } => {
                    self.handle_shutdown();
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn register_endpoint(&mut self, endpoint_id: EndpointId, service_id: ServiceId, active_channel: Arc<EndpointChannel>) {
        let upgrade_service_id = wrap_service_id(&service_id);
        self.endpoints.insert(
            endpoint_id,
            EndpointState {
                service_id,
                upgrade_service_id,
                session: Session::new(active_channel, self.config.initial_delay),
                preference_list: Vec::new(),
                cancellation: CancellationFlag::new(),
            },
        );
    }

    async fn handle_initiate(
        &mut self,
        endpoint_id: EndpointId,
        preference_list: Vec<Medium>,
    ) -> Result<(), BwuError> {
        if self.in_progress.contains(&endpoint_id) {
            return Err(BwuError::AlreadyInProgress);
        }
        let state = self
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or(BwuError::UnknownEndpoint)?;
        state.preference_list = preference_list.clone();
        self.attempt_initiate(endpoint_id, preference_list).await
    }

    /// Common tail of a first `InitiateBwuForEndpoint` call and a retry
    /// wakeup: `candidates` is either the full preference list (first
    /// attempt) or the untried tail (retry).
    async fn attempt_initiate(
        &mut self,
        endpoint_id: EndpointId,
        candidates: Vec<Medium>,
    ) -> Result<(), BwuError> {
        let chosen_so_far = self
            .endpoints
            .get(&endpoint_id)
            .ok_or(BwuError::UnknownEndpoint)?
            .session
            .chosen_medium;
        let chosen = self.choose_best_upgrade_medium(&candidates, chosen_so_far);
        if chosen == Medium::Unknown {
            debug!(%endpoint_id, "no available upgrade medium, not initiating");
            return Ok(());
        }

        let upgrade_service_id = self.endpoints[&endpoint_id].upgrade_service_id.clone();
        self.in_progress.insert(endpoint_id.clone());

        let outcome = {
            let Some(handler) = self.handlers.get(&chosen) else {
                self.in_progress.remove(&endpoint_id);
                return Err(BwuError::NoHandlerForMedium(chosen));
            };
            let state = self.endpoints.get_mut(&endpoint_id).unwrap();
            self.protocol
                .initiate(&mut state.session, handler.as_ref(), &upgrade_service_id, &endpoint_id)
                .await
        };

        match outcome {
            Ok(_) => Ok(()),
            Err(e) => {
                self.in_progress.remove(&endpoint_id);
                self.record_attempt(&endpoint_id, chosen, AttemptOutcome::Failure);
                if let Some(state) = self.endpoints.get_mut(&endpoint_id) {
                    state.session.attempted_mediums.push(chosen);
                    state.session.reset_to_idle();
                }
                self.schedule_retry(endpoint_id);
                Err(e.into())
            }
        }
    }

    async fn handle_incoming_frame(
        &mut self,
        endpoint_id: EndpointId,
        event: BwuNegotiationEvent,
    ) -> Result<(), BwuError> {
        match event {
            BwuNegotiationEvent::UpgradePathAvailable(path_info) => {
                self.handle_upgrade_path_available(endpoint_id, path_info).await
            }
            BwuNegotiationEvent::LastWriteToPriorChannel => {
                let state = self
                    .endpoints
                    .get_mut(&endpoint_id)
                    .ok_or(BwuError::UnknownEndpoint)?;
                self.protocol.handle_last_write_to_prior_channel(&mut state.session).await?;
                Ok(())
            }
            BwuNegotiationEvent::SafeToClosePriorChannel => {
                let medium = {
                    let state = self
                        .endpoints
                        .get_mut(&endpoint_id)
                        .ok_or(BwuError::UnknownEndpoint)?;
                    self.protocol.handle_safe_to_close_prior_channel(&mut state.session).await?
                };
                self.in_progress.remove(&endpoint_id);
                info!(%endpoint_id, %medium, "bandwidth changed");
                self.record_attempt(&endpoint_id, medium, AttemptOutcome::Success);
                Ok(())
            }
            BwuNegotiationEvent::UpgradeFailure(path_info) => {
                self.handle_upgrade_failure(endpoint_id, path_info.medium);
                Ok(())
            }
            BwuNegotiationEvent::ClientIntroduction(_) | BwuNegotiationEvent::ClientIntroductionAck => {
                Err(UpgradeError::Protocol(
                    "CLIENT_INTRODUCTION(_ACK) arrives on the new channel, not the old one".into(),
                )
                .into())
            }
        }
    }

    async fn handle_upgrade_path_available(
        &mut self,
        endpoint_id: EndpointId,
        path_info: UpgradePathInfo,
    ) -> Result<(), BwuError> {
        if !self.passes_wifi_lan_hotspot_policy(path_info.medium) {
            warn!(%endpoint_id, medium = %path_info.medium, "refusing upgrade: would tear down an active WIFI_LAN connection");
            return Ok(());
        }

        let medium = path_info.medium;
        let service_id = self
            .endpoints
            .get(&endpoint_id)
            .ok_or(BwuError::UnknownEndpoint)?
            .service_id
            .clone();

        let outcome = {
            let handler = self
                .handlers
                .get(&medium)
                .ok_or(BwuError::NoHandlerForMedium(medium))?;
            let state = self.endpoints.get_mut(&endpoint_id).unwrap();
            self.protocol
                .handle_upgrade_path_available(
                    &mut state.session,
                    handler.as_ref(),
                    &service_id,
                    &endpoint_id,
                    path_info,
                    &state.cancellation,
                )
                .await
        };

        match outcome {
            Ok(ResponderOutcome::Started) => {
                self.in_progress.insert(endpoint_id);
                Ok(())
            }
            Ok(ResponderOutcome::SameMediumIgnored) => Ok(()),
            Err(e) => {
                self.record_attempt(&endpoint_id, medium, AttemptOutcome::Failure);
                Err(e.into())
            }
        }
    }

    async fn handle_client_introduction(
        &mut self,
        endpoint_id: EndpointId,
        new_channel: Arc<EndpointChannel>,
        intro: ClientIntroduction,
    ) -> Result<(), BwuError> {
        let state = self
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or(BwuError::UnknownEndpoint)?;
        self.protocol.handle_client_introduction(&mut state.session, new_channel, intro).await?;
        Ok(())
    }

    fn handle_upgrade_failure(&mut self, endpoint_id: EndpointId, failed_medium: Medium) {
        self.in_progress.remove(&endpoint_id);
        self.record_attempt(&endpoint_id, failed_medium, AttemptOutcome::Failure);
        if let Some(state) = self.endpoints.get_mut(&endpoint_id) {
            self.protocol.handle_upgrade_failure(&mut state.session, failed_medium);
        }
        self.schedule_retry(endpoint_id);
    }

    async fn handle_retry(&mut self, endpoint_id: EndpointId) {
        if self.in_progress.contains(&endpoint_id) || !self.endpoints.contains_key(&endpoint_id) {
            return;
        }
        let (preference_list, attempted) = {
            let state = &self.endpoints[&endpoint_id];
            (state.preference_list.clone(), state.session.attempted_mediums.clone())
        };
        let mut untried = Self::compute_untried_mediums(&preference_list, &attempted);
        if untried.is_empty() {
            debug!(%endpoint_id, "retry: preference list exhausted, starting over");
            if let Some(state) = self.endpoints.get_mut(&endpoint_id) {
                state.session.attempted_mediums.clear();
            }
            untried = preference_list;
        }
        let _ = self.attempt_initiate(endpoint_id, untried).await;
    }

    fn schedule_retry(&mut self, endpoint_id: EndpointId) {
        let Some(state) = self.endpoints.get_mut(&endpoint_id) else {
            return;
        };
        let delay = state.session.retry_delay;
        state.session.retry_delay = self.config.next_delay(delay);
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Command::Retry { endpoint_id }).await;
        });
    }

    /// `ChooseBestUpgradeMedium`.
    fn choose_best_upgrade_medium(&self, candidates: &[Medium], chosen_so_far: Option<Medium>) -> Medium {
        let available: Vec<Medium> = candidates
            .iter()
            .copied()
            .filter(|m| self.handlers.get(m).map(|h| h.is_available()).unwrap_or(false))
            .filter(|m| self.passes_wifi_lan_hotspot_policy(*m))
            .collect();

        match chosen_so_far {
            None => available.first().copied().unwrap_or(Medium::Unknown),
            Some(m) if available.contains(&m) => m,
            Some(_) => Medium::Unknown,
        }
    }

    fn passes_wifi_lan_hotspot_policy(&self, candidate: Medium) -> bool {
        candidate != Medium::WifiHotspot
            || !self
                .endpoints
                .values()
                .any(|state| state.session.active_channel.medium() == Medium::WifiLan)
    }

    /// `ComputeUntriedMediums`: drop every medium up to and
    /// including the last-attempted one; the tail is the candidate set.
    fn compute_untried_mediums(preference_list: &[Medium], attempted: &[Medium]) -> Vec<Medium> {
        match attempted.last() {
            None => preference_list.to_vec(),
            Some(last) => match preference_list.iter().position(|m| m == last) {
                Some(idx) => preference_list[idx + 1..].to_vec(),
                None => preference_list.to_vec(),
            },
        }
    }

    /// Disconnect handling. Reverts when at most one endpoint for the
    /// service remains rather than waiting for zero — deliberately kept as
    /// `<= 1` rather than `== 0` even though that reverts one endpoint
    /// early whenever exactly two remain, since no evidence disambiguates
    /// which threshold is intended.
    fn handle_disconnect(&mut self, endpoint_id: &EndpointId) {
        let Some(state) = self.endpoints.remove(endpoint_id) else {
            return;
        };
        self.in_progress.remove(endpoint_id);

        if let Some(previous) = &state.session.previous_channel {
            previous.close(CloseReason::RemoteDisconnection);
        }

        let medium = state.session.active_channel.medium();
        if let Some(handler) = self.handlers.get(&medium) {
            handler.on_endpoint_disconnect(endpoint_id);
        }

        let remaining_for_service = self
            .endpoints
            .values()
            .filter(|s| s.service_id == state.service_id)
            .count();

        if remaining_for_service <= 1 {
            if let Some(handler) = self.handlers.get(&medium) {
                // Both calls fire unconditionally rather than branching on
                // initiator/responder role: `upgrade_service_id` is always
                // wrapped (`register_endpoint` wraps it unconditionally), and
                // `revert_responder_state` is a no-op for handlers/mediums
                // that never joined as responder. The handler-side refcounted
                // guards (`BaseMediumHandler::active`, `joined_as_responder`)
                // make the redundant call harmless.
                if is_wrapped(&state.upgrade_service_id) {
                    handler.revert_initiator_state(&state.upgrade_service_id, endpoint_id);
                }
                if matches!(medium, Medium::WifiHotspot | Medium::WifiDirect) {
                    handler.revert_responder_state(&state.service_id);
                }
            }
        }
    }

    /// Cancels an in-flight dial for `endpoint_id`: sets its cancellation
    /// flag so a `create_upgraded_channel` poll observes it, and tells the
    /// handler for the medium currently being dialed to abandon the attempt
    /// too. A no-op if `endpoint_id` isn't tracked.
    fn handle_cancel_dial(&mut self, endpoint_id: &EndpointId) {
        let Some(state) = self.endpoints.get(endpoint_id) else {
            return;
        };
        state.cancellation.cancel();
        if let Some(medium) = state.session.chosen_medium {
            if let Some(handler) = self.handlers.get(&medium) {
                handler.cancel_dial(endpoint_id);
            }
        }
    }

    /// Shutdown: close every stored previous/active channel with
    /// `SHUTDOWN`, drop in-flight retries (their timers fire into a now-empty
    /// `endpoints` map and become no-ops), and revert every handler.
    fn handle_shutdown(&mut self) {
        for (_endpoint_id, state) in self.endpoints.drain() {
            if let Some(previous) = &state.session.previous_channel {
                previous.close(CloseReason::Shutdown);
            }
            state.session.active_channel.close(CloseReason::Shutdown);
        }
        self.in_progress.clear();
        for handler in self.handlers.values() {
            handler.revert_all();
        }
    }

    fn record_attempt(&self, endpoint_id: &EndpointId, medium: Medium, outcome: AttemptOutcome) {
        self.telemetry.record(UpgradeAttemptRecord {
            endpoint_id: endpoint_id.clone(),
            start: Instant::now(),
            medium,
            outcome,
            error_stage: None,
        });
    }
}
