//! The five-message upgrade handshake, driven per-endpoint.
//!
//! `UpgradeProtocol` is deliberately stateless; all mutable state lives in
//! the [`Session`] the caller (`BwuManager`) passes in, serialized by its
//! single work queue. Every method here corresponds to one arrow in the
//! initiator/responder state diagrams.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::channel::{ChannelError, CloseReason, EndpointChannel};
use crate::medium::{HandlerError, MediumHandler};
use crate::model::{CancellationFlag, EndpointId, Medium, ServiceId};
use crate::upgrade::path_info::{ClientIntroduction, UpgradePathInfo};
use crate::upgrade::session::{Session, SessionState};
use crate::upgrade::validate::{self, ValidationError};
use crate::wire::BwuNegotiationEvent;

/// Best-effort payload written (plaintext) just before closing the old
/// channel, so the peer has a chance to notice the disconnect even if it
/// never observes `SAFE_TO_CLOSE_PRIOR_CHANNEL`. Losing this write is
/// tolerable — hence `disable_encryption` plus fire-and-forget.
const BEST_EFFORT_DISCONNECT_NOTICE: &[u8] = b"bwu-disconnect";

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("an upgrade is already in progress for this endpoint")]
    AlreadyInProgress,
    #[error("medium failed to initialize for listening")]
    MediumInitializeFailed,
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("medium handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("invalid upgrade path info: {0}")]
    Validation(#[from] ValidationError),
    #[error("received a second UPGRADE_PATH_AVAILABLE mid-upgrade")]
    DuplicateUpgrade,
    #[error("timed out waiting for the client introduction (or its ack)")]
    IntroductionTimeout,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// What happened when the responder processed an inbound
/// `UPGRADE_PATH_AVAILABLE`.
pub enum ResponderOutcome {
    /// A new channel was dialed, introduced, and registered; the session is
    /// now draining the old channel.
    Started,
    /// The proposed medium equaled the current channel's medium; this is
    /// silently ignored, no side effects.
    SameMediumIgnored,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UpgradeProtocolConfig {
    /// Bound on reading `CLIENT_INTRODUCTION` on the newly dialed channel,
    /// and on reading `CLIENT_INTRODUCTION_ACK` when the initiator offered
    /// one — both share this one constant rather than a separate timeout
    /// for the ack wait.
    pub client_introduction_timeout: Duration,
    /// Bound on the best-effort extra read attempted right before closing
    /// the drained old channel.
    pub final_drain_read_timeout: Duration,
}

impl Default for UpgradeProtocolConfig {
    fn default() -> Self {
        Self {
            client_introduction_timeout: Duration::from_secs(5),
            final_drain_read_timeout: Duration::from_millis(200),
        }
    }
}

pub struct UpgradeProtocol {
    config: UpgradeProtocolConfig,
}

impl UpgradeProtocol {
    pub fn new(config: UpgradeProtocolConfig) -> Self {
        Self { config }
    }

    /// Initiator: brings up `handler`'s medium for this endpoint and writes
    /// `UPGRADE_PATH_AVAILABLE` on the current (old) channel.
    pub async fn initiate(
        &self,
        session: &mut Session,
        handler: &dyn MediumHandler,
        upgrade_service_id: &ServiceId,
        endpoint_id: &EndpointId,
    ) -> Result<UpgradePathInfo, UpgradeError> {
        if session.is_mid_upgrade() {
            return Err(UpgradeError::AlreadyInProgress);
        }

        let path_info = handler
            .initialize_for_endpoint(upgrade_service_id, endpoint_id)
            .await
            .ok_or(UpgradeError::MediumInitializeFailed)?;

        session.chosen_medium = Some(path_info.medium);
        session.state = SessionState::Initiated;
        session.supports_client_introduction_ack = path_info.supports_client_introduction_ack;

        session
            .active_channel
            .write(BwuNegotiationEvent::UpgradePathAvailable(path_info.clone()).encode())
            .await?;

        debug!(%endpoint_id, medium = %path_info.medium, "wrote UPGRADE_PATH_AVAILABLE");
        Ok(path_info)
    }

    /// Responder: reacts to an inbound `UPGRADE_PATH_AVAILABLE`, dialing the
    /// proposed medium and introducing itself on the new channel.
    pub async fn handle_upgrade_path_available(
        &self,
        session: &mut Session,
        handler: &dyn MediumHandler,
        service_id: &ServiceId,
        endpoint_id: &EndpointId,
        path_info: UpgradePathInfo,
        cancellation: &CancellationFlag,
    ) -> Result<ResponderOutcome, UpgradeError> {
        if path_info.medium == session.active_channel.medium() {
            debug!(%endpoint_id, medium = %path_info.medium, "same-medium upgrade proposed, ignoring");
            return Ok(ResponderOutcome::SameMediumIgnored);
        }

        if session.is_mid_upgrade() {
            warn!(%endpoint_id, "duplicate UPGRADE_PATH_AVAILABLE mid-upgrade, resetting session");
            if let Some(previous) = session.previous_channel.take() {
                previous.close(CloseReason::Unfinished);
            }
            session.active_channel.close(CloseReason::Unfinished);
            session.reset_to_idle();
            return Err(UpgradeError::DuplicateUpgrade);
        }

        if let Err(e) = validate::validate(&path_info) {
            self.fail_as_responder(session, handler, service_id, path_info).await;
            return Err(e.into());
        }

        let new_channel = match handler
            .create_upgraded_channel(service_id, endpoint_id, &path_info, cancellation)
            .await
        {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                self.fail_as_responder(session, handler, service_id, path_info).await;
                return Err(e.into());
            }
        };

        session.chosen_medium = Some(path_info.medium);

        let local_intro = ClientIntroduction {
            endpoint_id: endpoint_id.clone(),
            supports_disabling_encryption: path_info.path.supports_disabling_encryption(),
        };
        if let Err(e) = new_channel
            .write(BwuNegotiationEvent::ClientIntroduction(local_intro).encode())
            .await
        {
            new_channel.close(CloseReason::Unfinished);
            return Err(e.into());
        }

        if path_info.supports_client_introduction_ack {
            match timeout(self.config.client_introduction_timeout, new_channel.read()).await {
                Ok(Ok(bytes)) => match BwuNegotiationEvent::decode(&bytes) {
                    Ok(BwuNegotiationEvent::ClientIntroductionAck) => {}
                    other => {
                        warn!(%endpoint_id, ?other, "expected CLIENT_INTRODUCTION_ACK");
                    }
                },
                Ok(Err(e)) => {
                    new_channel.close(CloseReason::Unfinished);
                    return Err(e.into());
                }
                Err(_) => {
                    new_channel.close(CloseReason::Unfinished);
                    return Err(UpgradeError::IntroductionTimeout);
                }
            }
        }

        self.register_new_channel(session, new_channel).await?;
        Ok(ResponderOutcome::Started)
    }

    async fn fail_as_responder(
        &self,
        session: &Session,
        handler: &dyn MediumHandler,
        service_id: &ServiceId,
        path_info: UpgradePathInfo,
    ) {
        let failed_medium = path_info.medium;
        if let Err(e) = session
            .active_channel
            .write(BwuNegotiationEvent::UpgradeFailure(path_info).encode())
            .await
        {
            warn!(error = %e, "failed to write UPGRADE_FAILURE to peer");
        }
        if matches!(failed_medium, Medium::WifiHotspot | Medium::WifiDirect) {
            handler.revert_responder_state(service_id);
        }
    }

    /// Initiator: reacts to an inbound `CLIENT_INTRODUCTION` on a freshly
    /// accepted channel, optionally acking it, then registering it.
    pub async fn handle_client_introduction(
        &self,
        session: &mut Session,
        new_channel: Arc<EndpointChannel>,
        intro: ClientIntroduction,
    ) -> Result<(), UpgradeError> {
        debug!(endpoint_id = %intro.endpoint_id, "received CLIENT_INTRODUCTION");

        if session.supports_client_introduction_ack {
            new_channel
                .write(BwuNegotiationEvent::ClientIntroductionAck.encode())
                .await?;
        }

        self.register_new_channel(session, new_channel).await
    }

    /// Common tail of both initiator and responder flows: marks the new
    /// channel active-but-paused, writes `LAST_WRITE_TO_PRIOR_CHANNEL` on
    /// the old one, and immediately finishes the drain if the peer's own
    /// `LAST_WRITE` had already arrived and been latched before this new
    /// channel was registered.
    async fn register_new_channel(
        &self,
        session: &mut Session,
        new_channel: Arc<EndpointChannel>,
    ) -> Result<(), UpgradeError> {
        new_channel.pause();
        let old = session.active_channel.clone();
        session.previous_channel = Some(old.clone());
        session.active_channel = new_channel;
        session.state = SessionState::AwaitingLastWriteFromPeer;

        old.write(BwuNegotiationEvent::LastWriteToPriorChannel.encode())
            .await?;

        if session.successfully_drained_prior {
            self.handle_last_write_to_prior_channel(session).await?;
        }
        Ok(())
    }

    /// Called when `LAST_WRITE_TO_PRIOR_CHANNEL` is read off the old
    /// channel. May race ahead of [`Self::register_new_channel`]; if the new
    /// channel isn't registered yet, latches `successfully_drained_prior`
    /// instead of failing.
    pub async fn handle_last_write_to_prior_channel(
        &self,
        session: &mut Session,
    ) -> Result<(), UpgradeError> {
        let Some(old) = session.previous_channel.clone() else {
            session.successfully_drained_prior = true;
            return Ok(());
        };

        old.write(BwuNegotiationEvent::SafeToClosePriorChannel.encode())
            .await?;
        session.state = SessionState::AwaitingSafeToCloseFromPeer;
        Ok(())
    }

    /// Called when `SAFE_TO_CLOSE_PRIOR_CHANNEL` is read off the old
    /// channel: drains it with a best-effort plaintext notice, closes it,
    /// and resumes the new channel. Returns the medium now in use.
    pub async fn handle_safe_to_close_prior_channel(
        &self,
        session: &mut Session,
    ) -> Result<Medium, UpgradeError> {
        let Some(old) = session.previous_channel.take() else {
            return Err(UpgradeError::Protocol(
                "SAFE_TO_CLOSE_PRIOR_CHANNEL received with no previous channel registered".into(),
            ));
        };

        old.disable_encryption();
        if let Err(e) = old.write(BEST_EFFORT_DISCONNECT_NOTICE.to_vec()).await {
            debug!(error = %e, "best-effort disconnect notice failed to send, ignoring");
        }
        let _ = timeout(self.config.final_drain_read_timeout, old.read()).await;
        old.close(CloseReason::Upgraded);

        session.active_channel.resume().await?;
        session.state = SessionState::Complete;
        session.successfully_drained_prior = false;

        let medium = session
            .chosen_medium
            .ok_or_else(|| UpgradeError::Protocol("completed upgrade with no chosen medium".into()))?;
        Ok(medium)
    }

    /// Called when the peer sends `UPGRADE_FAILURE` (or a local attempt
    /// fails before the peer could be reached): records the failed medium
    /// and resets to idle so a retry can pick the next untried medium.
    pub fn handle_upgrade_failure(&self, session: &mut Session, failed_medium: Medium) {
        session.attempted_mediums.push(failed_medium);
        session.reset_to_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::HandlerError;
    use async_trait::async_trait;
    use tokio::io::duplex;

    struct FakeHandler {
        medium: Medium,
        path_info: Option<UpgradePathInfo>,
        channel_pair: std::sync::Mutex<Option<tokio::io::DuplexStream>>,
    }

    #[async_trait]
    impl MediumHandler for FakeHandler {
        fn medium_tag(&self) -> Medium {
            self.medium
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn initialize_for_endpoint(
            &self,
            _upgrade_service_id: &ServiceId,
            _endpoint_id: &EndpointId,
        ) -> Option<UpgradePathInfo> {
            self.path_info.clone()
        }
        async fn create_upgraded_channel(
            &self,
            _service_id: &ServiceId,
            endpoint_id: &EndpointId,
            _path_info: &UpgradePathInfo,
            _cancellation: &CancellationFlag,
        ) -> Result<EndpointChannel, HandlerError> {
            let side = self.channel_pair.lock().unwrap().take().unwrap();
            Ok(EndpointChannel::new(
                Box::new(side),
                self.medium,
                "svc".to_string(),
                endpoint_id.clone(),
                4096,
            ))
        }
        fn revert_initiator_state(&self, _upgrade_service_id: &ServiceId, _endpoint_id: &EndpointId) {}
        fn revert_all(&self) {}
    }

    fn old_channel_pair() -> (Arc<EndpointChannel>, Arc<EndpointChannel>) {
        let (a, b) = duplex(8192);
        (
            Arc::new(EndpointChannel::new(Box::new(a), Medium::Ble, "s".into(), "init", 512)),
            Arc::new(EndpointChannel::new(Box::new(b), Medium::Ble, "s".into(), "resp", 512)),
        )
    }

    #[tokio::test]
    async fn initiate_writes_upgrade_path_available() {
        let (old_a, old_b) = old_channel_pair();
        let mut session = Session::new(old_a, Duration::from_secs(1));
        let handler = FakeHandler {
            medium: Medium::WifiLan,
            path_info: Some(UpgradePathInfo::wifi_lan("10.0.0.1", 80)),
            channel_pair: std::sync::Mutex::new(None),
        };
        let protocol = UpgradeProtocol::new(UpgradeProtocolConfig::default());

        protocol
            .initiate(&mut session, &handler, &"svc_UPGRADE".to_string(), &"1".to_string())
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Initiated);

        let frame = old_b.read().await.unwrap();
        assert!(matches!(
            BwuNegotiationEvent::decode(&frame).unwrap(),
            BwuNegotiationEvent::UpgradePathAvailable(_)
        ));
    }

    #[tokio::test]
    async fn same_medium_upgrade_is_ignored() {
        let (old_a, _old_b) = old_channel_pair();
        let mut session = Session::new(old_a, Duration::from_secs(1));
        let handler = FakeHandler {
            medium: Medium::Ble,
            path_info: None,
            channel_pair: std::sync::Mutex::new(None),
        };
        let protocol = UpgradeProtocol::new(UpgradeProtocolConfig::default());
        let path_info = UpgradePathInfo::wifi_lan("ignored", 1).path; // unused
        let _ = path_info;

        let same_medium_info =
            UpgradePathInfo::new(crate::upgrade::path_info::UpgradePath::Bluetooth {
                service_name: "x".into(),
                mac_address: "y".into(),
            }, false);
        // Active channel medium is Ble; proposing Bluetooth is a different
        // medium, so build a Ble-tagged info instead by overriding `medium`.
        let mut ble_info = same_medium_info;
        ble_info.medium = Medium::Ble;

        let outcome = protocol
            .handle_upgrade_path_available(
                &mut session,
                &handler,
                &"svc".to_string(),
                &"1".to_string(),
                ble_info,
                &CancellationFlag::new(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ResponderOutcome::SameMediumIgnored));
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn full_handshake_completes_and_resumes_new_channel() {
        let (old_a, old_b) = old_channel_pair();
        let mut initiator_session = Session::new(old_a, Duration::from_secs(1));
        let mut responder_session = Session::new(old_b, Duration::from_secs(1));

        let (new_a, new_b) = duplex(8192);
        let responder_handler = FakeHandler {
            medium: Medium::WifiLan,
            path_info: None,
            channel_pair: std::sync::Mutex::new(Some(new_b)),
        };
        let initiator_handler = FakeHandler {
            medium: Medium::WifiLan,
            path_info: Some(UpgradePathInfo::wifi_lan("10.0.0.1", 80)),
            channel_pair: std::sync::Mutex::new(None),
        };

        let protocol = UpgradeProtocol::new(UpgradeProtocolConfig::default());
        let upgrade_service_id = "svc_UPGRADE".to_string();
        let service_id = "svc".to_string();

        let path_info = protocol
            .initiate(&mut initiator_session, &initiator_handler, &upgrade_service_id, &"init".to_string())
            .await
            .unwrap();

        // Responder "receives" the UPGRADE_PATH_AVAILABLE frame (in a real
        // system this comes off responder_session.active_channel's peer
        // read; here we just hand the decoded value straight through).
        let new_channel_for_initiator = Arc::new(EndpointChannel::new(
            Box::new(new_a),
            Medium::WifiLan,
            service_id.clone(),
            "new-for-init",
            4096,
        ));

        let responder_task = {
            let protocol_cfg = UpgradeProtocolConfig::default();
            async move {
                let protocol = UpgradeProtocol::new(protocol_cfg);
                protocol
                    .handle_upgrade_path_available(
                        &mut responder_session,
                        &responder_handler,
                        &service_id,
                        &"resp".to_string(),
                        path_info,
                        &CancellationFlag::new(),
                    )
                    .await
                    .unwrap();
                responder_session
            }
        };

        // Drive the initiator's side of the first frame concurrently with
        // the responder's dial+introduce.
        let (mut responder_session, intro_frame) = tokio::join!(responder_task, async {
            new_channel_for_initiator.read().await.unwrap()
        });

        let intro = match BwuNegotiationEvent::decode(&intro_frame).unwrap() {
            BwuNegotiationEvent::ClientIntroduction(intro) => intro,
            other => panic!("expected CLIENT_INTRODUCTION, got {other:?}"),
        };
        protocol
            .handle_client_introduction(&mut initiator_session, new_channel_for_initiator.clone(), intro)
            .await
            .unwrap();

        // Both sides now exchange LAST_WRITE / SAFE_TO_CLOSE on the old
        // channel pair (old_b <-> the responder's original old_a is
        // `old_b` from responder's perspective: responder_session's old
        // channel is what used to be `old_b`; initiator's is the matching
        // peer already consumed as `old_a` by `initiator_session`). We read
        // each side's mailbox in turn to drive the remaining transitions.
        let frame = responder_session
            .previous_channel
            .as_ref()
            .unwrap()
            .read()
            .await
            .unwrap();
        assert!(matches!(
            BwuNegotiationEvent::decode(&frame).unwrap(),
            BwuNegotiationEvent::LastWriteToPriorChannel
        ));
        protocol
            .handle_last_write_to_prior_channel(&mut responder_session)
            .await
            .unwrap();

        let frame = initiator_session
            .previous_channel
            .as_ref()
            .unwrap()
            .read()
            .await
            .unwrap();
        assert!(matches!(
            BwuNegotiationEvent::decode(&frame).unwrap(),
            BwuNegotiationEvent::LastWriteToPriorChannel
        ));
        protocol
            .handle_last_write_to_prior_channel(&mut initiator_session)
            .await
            .unwrap();

        let frame = responder_session
            .previous_channel
            .as_ref()
            .unwrap()
            .read()
            .await
            .unwrap();
        assert!(matches!(
            BwuNegotiationEvent::decode(&frame).unwrap(),
            BwuNegotiationEvent::SafeToClosePriorChannel
        ));
        let medium = protocol
            .handle_safe_to_close_prior_channel(&mut responder_session)
            .await
            .unwrap();
        assert_eq!(medium, Medium::WifiLan);
        assert!(!responder_session.active_channel.is_paused());

        let frame = initiator_session
            .previous_channel
            .as_ref()
            .unwrap()
            .read()
            .await
            .unwrap();
        assert!(matches!(
            BwuNegotiationEvent::decode(&frame).unwrap(),
            BwuNegotiationEvent::SafeToClosePriorChannel
        ));
        let medium = protocol
            .handle_safe_to_close_prior_channel(&mut initiator_session)
            .await
            .unwrap();
        assert_eq!(medium, Medium::WifiLan);
        assert!(!initiator_session.active_channel.is_paused());
        assert_eq!(initiator_session.state, SessionState::Complete);
    }
}
