//! Everything the call loop consumes, funnelled through one mpsc queue.

use tokio::sync::{mpsc, oneshot};

use crate::domain::call::{CallError, CallSnapshot};
use crate::domain::identity::{CallId, RemoteStream, SessionId};
use crate::domain::signal::NegotiationPayload;

use super::ports::RelayEvent;

/// What the local user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIntent {
    Dial {
        remote: SessionId,
        display_name: Option<String>,
    },
    Answer,
    Reject,
    Hangup,
}

impl UserIntent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dial { .. } => "dial",
            Self::Answer => "answer",
            Self::Reject => "reject",
            Self::Hangup => "hangup",
        }
    }
}

/// Callback from a negotiation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    PayloadReady(NegotiationPayload),
    StreamReady(RemoteStream),
    Failure(String),
}

pub type IntentReply = oneshot::Sender<Result<(), CallError>>;

#[derive(Debug)]
pub enum CallInput {
    Intent {
        intent: UserIntent,
        reply: Option<IntentReply>,
    },
    Relay(RelayEvent),
    Engine {
        call_id: CallId,
        event: EngineEvent,
    },
    DialTimeout(CallId),
    Snapshot(oneshot::Sender<CallSnapshot>),
    /// Hang up whatever is in progress and stop the loop.
    Shutdown,
}

/// Handed to each negotiation engine; tags its events with the owning call.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    call_id: CallId,
    tx: mpsc::UnboundedSender<CallInput>,
}

impl EngineEventSink {
    pub fn new(call_id: CallId, tx: mpsc::UnboundedSender<CallInput>) -> Self {
        Self { call_id, tx }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn payload_ready(&self, payload: NegotiationPayload) {
        self.push(EngineEvent::PayloadReady(payload));
    }

    pub fn stream_ready(&self, stream: RemoteStream) {
        self.push(EngineEvent::StreamReady(stream));
    }

    pub fn failure(&self, reason: impl Into<String>) {
        self.push(EngineEvent::Failure(reason.into()));
    }

    fn push(&self, event: EngineEvent) {
        if self
            .tx
            .send(CallInput::Engine {
                call_id: self.call_id,
                event,
            })
            .is_err()
        {
            tracing::debug!(call_id = ?self.call_id, "Call loop gone, dropping engine event");
        }
    }
}
