//! Signaling message types carried by the relay.
//!
//! [`Signal`] is what one endpoint says to the other; [`RelayFrame`] is the
//! envelope exchanged between an endpoint and the relay. Pure data, no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identity::SessionId;

// ---------------------------------------------------------------------------
// Negotiation payload
// ---------------------------------------------------------------------------

/// Opaque blob produced by a negotiation engine (offer, answer, ...).
///
/// Never inspected by the signaling layer, only forwarded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NegotiationPayload(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl NegotiationPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for NegotiationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NegotiationPayload({} bytes)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Endpoint-to-endpoint signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Caller -> callee: proposes a call and carries the initiator's payload.
    CallRequest {
        from: SessionId,
        display_name: Option<String>,
        payload: NegotiationPayload,
    },
    /// Callee -> caller: carries the responder's payload.
    CallAccepted { payload: NegotiationPayload },
    /// Either side: the sender withdrew or hung up.
    CallEnded,
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallRequest { .. } => "call-request",
            Self::CallAccepted { .. } => "call-accepted",
            Self::CallEnded => "call-ended",
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint <-> relay envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayFrame {
    // -- Endpoint -> relay --
    Hello {
        client_version: String,
    },
    Route {
        to: SessionId,
        signal: Signal,
    },

    // -- Relay -> endpoint --
    IdentityAssigned {
        id: SessionId,
    },
    /// `from` is filled in by the relay, not by the sender.
    Deliver {
        from: SessionId,
        signal: Signal,
    },
    PeerDisconnected {
        id: SessionId,
    },
    Undeliverable {
        to: SessionId,
    },
}
