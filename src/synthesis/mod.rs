//! # Speech Synthesis Upstream
//!
//! Everything the relay needs to talk to the TTS backend:
//! - **protocol**: request/response JSON and base64 audio decoding
//! - **client**: the per-call pump that owns the upstream socket
//!
//! The pump never touches session state directly. It reports to the session
//! actor through the messages defined here, which the actor processes one at
//! a time in its mailbox.

pub mod client;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::RelayError;
use actix::dev::ToEnvelope;
use actix::prelude::*;
use protocol::SynthesisChunk;

/// A decoded upstream message for the session.
///
/// The handler replies with the session's unsent byte count so the pump can
/// apply backpressure.
#[derive(Message, Debug)]
#[rtype(result = "usize")]
pub struct SynthesisDelivered(pub SynthesisChunk);

/// Ask the session how many unsent bytes it holds.
#[derive(Message, Debug)]
#[rtype(result = "usize")]
pub struct PendingBytes;

/// Upstream connection lifecycle events.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub enum SynthesisStatus {
    /// Socket open and request sent
    Connected,

    /// Backend finished the transcript; upstream socket closed by the relay
    Completed,

    /// Backend closed the socket before signalling completion
    Closed,

    /// Connect or protocol failure; fatal to this session only
    Failed(RelayError),
}

/// The recipients a pump reports to.
///
/// ## Rust Concepts:
/// - **Recipient<M>**: type-erased address of any actor that handles `M`,
///   so the pump can be tested against a stand-in actor
#[derive(Clone)]
pub struct SessionLink {
    pub chunks: Recipient<SynthesisDelivered>,
    pub pending: Recipient<PendingBytes>,
    pub status: Recipient<SynthesisStatus>,
}

impl SessionLink {
    /// Link to an actor that handles all three message types.
    pub fn to<A>(addr: &Addr<A>) -> Self
    where
        A: Actor + Handler<SynthesisDelivered> + Handler<PendingBytes> + Handler<SynthesisStatus>,
        A::Context: ToEnvelope<A, SynthesisDelivered>
            + ToEnvelope<A, PendingBytes>
            + ToEnvelope<A, SynthesisStatus>,
    {
        Self {
            chunks: addr.clone().recipient(),
            pending: addr.clone().recipient(),
            status: addr.clone().recipient(),
        }
    }
}
