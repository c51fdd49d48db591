//! Call lifecycle value types: phase, role, end reasons, snapshots, errors.

use std::fmt;

use super::identity::{CallId, SessionId};

// ---------------------------------------------------------------------------
// Phase + role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPhase {
    Idle,
    Dialing,
    Ringing,
    Negotiating,
    Active,
    /// Transient: reported while cleanup runs, immediately followed by `Idle`.
    Ended,
}

impl CallPhase {
    /// True for the phases in which a negotiation handle must be held.
    pub fn holds_negotiation(self) -> bool {
        matches!(
            self,
            Self::Dialing | Self::Ringing | Self::Negotiating | Self::Active
        )
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Ringing => "ringing",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Which side of the offer/answer exchange a negotiation engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationRole {
    Initiator,
    Responder,
}

impl From<CallRole> for NegotiationRole {
    fn from(role: CallRole) -> Self {
        match role {
            CallRole::Caller => Self::Initiator,
            CallRole::Callee => Self::Responder,
        }
    }
}

// ---------------------------------------------------------------------------
// Why a call ended
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    Rejected,
    RemoteHangup,
    DialTimeout,
    CapabilityUnavailable,
    NegotiationFailed(String),
    PeerUnreachable,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalHangup => f.write_str("local hangup"),
            Self::Rejected => f.write_str("rejected"),
            Self::RemoteHangup => f.write_str("remote hangup"),
            Self::DialTimeout => f.write_str("dial timeout"),
            Self::CapabilityUnavailable => f.write_str("media capture unavailable"),
            Self::NegotiationFailed(reason) => write!(f, "negotiation failed: {reason}"),
            Self::PeerUnreachable => f.write_str("peer unreachable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Read-only view of the call descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub call_id: Option<CallId>,
    pub phase: CallPhase,
    pub role: Option<CallRole>,
    pub local_identity: Option<SessionId>,
    pub remote_identity: Option<SessionId>,
    pub display_name: Option<String>,
    pub has_pending_payload: bool,
    pub has_negotiation_handle: bool,
    /// True once a live engine exists (false while merely reserved in Ringing).
    pub has_engine: bool,
    pub holds_local_stream: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("media capture unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),
    #[error("peer {0} is unreachable")]
    PeerUnreachable(SessionId),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("already in a call ({0})")]
    Busy(CallPhase),
    #[error("no session identity assigned yet")]
    NotRegistered,
    #[error("cannot {intent} while {phase}")]
    InvalidIntent {
        intent: &'static str,
        phase: CallPhase,
    },
    #[error("call loop has shut down")]
    LoopClosed,
}
