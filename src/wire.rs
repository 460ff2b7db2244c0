//! Minimal offline-frame types: just enough of the frame-type
//! enum and the `BandwidthUpgradeNegotiation` event/payload shape to carry
//! the five control messages of the upgrade handshake. Connection-request/
//! response and payload-transfer framing are out of scope and are
//! represented only as discriminants so a realistic top-level frame enum
//! type-checks.

use crate::bytes::{ByteReader, ByteWriter, BytesError};
use crate::upgrade::path_info::{ClientIntroduction, UpgradePathInfo};

/// Top-level offline frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineFrameType {
    ConnectionRequest,
    ConnectionResponse,
    PayloadTransfer,
    BandwidthUpgradeNegotiation,
    KeepAlive,
    Disconnection,
}

/// The `BandwidthUpgradeNegotiation` frame's event discriminator plus its
/// optional payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BwuNegotiationEvent {
    UpgradePathAvailable(UpgradePathInfo),
    ClientIntroduction(ClientIntroduction),
    ClientIntroductionAck,
    LastWriteToPriorChannel,
    SafeToClosePriorChannel,
    /// Carries the `UpgradePathInfo` that failed: the responder writes
    /// `UPGRADE_FAILURE` on the old channel carrying the path info it
    /// couldn't dial.
    UpgradeFailure(UpgradePathInfo),
}

impl BwuNegotiationEvent {
    fn tag(&self) -> u8 {
        match self {
            BwuNegotiationEvent::UpgradePathAvailable(_) => 0,
            BwuNegotiationEvent::ClientIntroduction(_) => 1,
            BwuNegotiationEvent::ClientIntroductionAck => 2,
            BwuNegotiationEvent::LastWriteToPriorChannel => 3,
            BwuNegotiationEvent::SafeToClosePriorChannel => 4,
            BwuNegotiationEvent::UpgradeFailure(_) => 5,
        }
    }

    /// Encodes this event as a standalone frame (tag byte + optional
    /// payload). `EndpointChannel::write` frames this at the transport
    /// level, so no outer length prefix is added here.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(self.tag());
        match self {
            BwuNegotiationEvent::UpgradePathAvailable(info)
            | BwuNegotiationEvent::UpgradeFailure(info) => info.write(&mut w),
            BwuNegotiationEvent::ClientIntroduction(intro) => intro.write(&mut w),
            BwuNegotiationEvent::ClientIntroductionAck
            | BwuNegotiationEvent::LastWriteToPriorChannel
            | BwuNegotiationEvent::SafeToClosePriorChannel => {}
        }
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BytesError> {
        let mut r = ByteReader::new(bytes);
        let tag = r.read_u8()?;
        let event = match tag {
            0 => BwuNegotiationEvent::UpgradePathAvailable(UpgradePathInfo::read(&mut r)?),
            1 => BwuNegotiationEvent::ClientIntroduction(ClientIntroduction::read(&mut r)?),
            2 => BwuNegotiationEvent::ClientIntroductionAck,
            3 => BwuNegotiationEvent::LastWriteToPriorChannel,
            4 => BwuNegotiationEvent::SafeToClosePriorChannel,
            5 => BwuNegotiationEvent::UpgradeFailure(UpgradePathInfo::read(&mut r)?),
            _ => return Err(BytesError::InvalidLength),
        };
        if !r.is_empty() {
            return Err(BytesError::IncompleteParse);
        }
        Ok(event)
    }
}
