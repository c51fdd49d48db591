//! Port traits (interfaces) that the call state machine depends on.
//!
//! Adapters implement these traits; the state machine never references Quinn,
//! a media stack, or a UI toolkit.

use async_trait::async_trait;

use crate::domain::call::{CallPhase, EndReason, NegotiationRole};
use crate::domain::identity::{LocalStream, RemoteStream, SessionId};
use crate::domain::signal::{NegotiationPayload, Signal};

use super::input::EngineEventSink;

// ---------------------------------------------------------------------------
// Signal relay
// ---------------------------------------------------------------------------

/// Something the relay told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    IdentityAssigned(SessionId),
    Signal { from: SessionId, signal: Signal },
    PeerDisconnected(SessionId),
    /// The relay had no endpoint registered under `to`.
    Undeliverable(SessionId),
    /// The connection to the relay itself is gone.
    ConnectionLost,
}

/// Abstracts one connection to the signal relay.
#[async_trait]
pub trait SignalRelay: Send + Sync {
    /// Send a signal addressed to another endpoint.
    async fn send_signal(&self, to: &SessionId, signal: Signal) -> anyhow::Result<()>;

    /// Receive the next relay event. Errors once the connection is closed.
    async fn next_event(&self) -> anyhow::Result<RelayEvent>;

    /// Actively close the connection. A task blocked on `next_event` gets an
    /// error and exits.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// Media capture
// ---------------------------------------------------------------------------

/// Acquires and releases the local camera/microphone stream.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Start capture. An error means the capability is denied or absent.
    async fn acquire(&self) -> anyhow::Result<LocalStream>;

    /// Stop all tracks of a previously acquired stream.
    fn release(&self, stream: LocalStream);
}

// ---------------------------------------------------------------------------
// Negotiation engine
// ---------------------------------------------------------------------------

/// One point-to-point negotiation (offer/answer) for a single call.
///
/// Outbound results (`payload-ready`, `stream-ready`, `failure`) are reported
/// through the [`EngineEventSink`] handed over at creation.
pub trait NegotiationEngine: Send {
    /// Feed the remote party's payload into the engine.
    fn accept_payload(&mut self, payload: NegotiationPayload) -> anyhow::Result<()>;

    /// Tear the engine down. Must be safe to call more than once.
    fn destroy(&mut self);
}

/// Creates a fresh [`NegotiationEngine`] per call.
pub trait NegotiationFactory: Send + Sync {
    fn create(
        &self,
        role: NegotiationRole,
        stream: LocalStream,
        sink: EngineEventSink,
    ) -> anyhow::Result<Box<dyn NegotiationEngine>>;
}

// ---------------------------------------------------------------------------
// App events (UI bridge)
// ---------------------------------------------------------------------------

/// Emits call events toward the UI layer.
#[async_trait]
pub trait CallEvents: Send + Sync {
    async fn emit_identity(&self, id: Option<&SessionId>);
    async fn emit_phase(&self, phase: CallPhase);
    async fn emit_incoming_call(&self, from: &SessionId, display_name: Option<&str>);
    async fn emit_remote_stream(&self, stream: RemoteStream);
    async fn emit_call_ended(&self, remote: Option<&SessionId>, reason: &EndReason);
}

/// [`CallEvents`] that only logs. Used when no UI is attached.
pub struct LogCallEvents;

#[async_trait]
impl CallEvents for LogCallEvents {
    async fn emit_identity(&self, id: Option<&SessionId>) {
        tracing::info!(?id, "Session identity changed");
    }

    async fn emit_phase(&self, phase: CallPhase) {
        tracing::debug!(%phase, "Call phase");
    }

    async fn emit_incoming_call(&self, from: &SessionId, display_name: Option<&str>) {
        tracing::info!(%from, ?display_name, "Incoming call");
    }

    async fn emit_remote_stream(&self, stream: RemoteStream) {
        tracing::info!(?stream, "Remote stream ready");
    }

    async fn emit_call_ended(&self, remote: Option<&SessionId>, reason: &EndReason) {
        tracing::info!(?remote, %reason, "Call ended");
    }
}
