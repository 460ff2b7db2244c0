//! Crate-wide error taxonomy.
//!
//! Mirrors the six error kinds from the design: transport, protocol, policy,
//! resource, cancellation and credential failures. Each kind wraps a more
//! specific per-module error so callers that only care about the coarse kind
//! can still match on it, while callers that need detail can drill in.

use crate::advertisement::codec::CodecError;
use crate::channel::ChannelError;
use crate::medium::HandlerError;

/// Top-level error type returned by the public operations of this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket/IO-level failure: connect failure, read timeout, peer closed.
    #[error("transport error: {0}")]
    Transport(#[from] ChannelError),

    /// A received frame was malformed, or arrived in a state that does not
    /// expect it.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A request was refused by policy (same-medium upgrade, Wifi Lan vs
    /// Hotspot conflict, ...).
    #[error("policy violation: {0}")]
    Policy(String),

    /// A medium-level resource could not be brought up (listener refused to
    /// start, peer device unresolved, ...).
    #[error("resource error: {0}")]
    Resource(#[from] HandlerError),

    /// The client cancelled the in-flight operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Advertisement decryption failed against every known credential.
    #[error("credential error: {0}")]
    Credential(#[from] CodecError),
}

pub type Result<T> = core::result::Result<T, Error>;
