//! Domain identifiers and opaque media handles.
//!
//! These are **pure data** with no I/O and no framework dependencies.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Relay-assigned address of one connected endpoint.
///
/// Valid for the lifetime of the relay connection; a reconnect yields a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Local counter distinguishing successive calls on one endpoint.
///
/// Engine callbacks and timers carry it so events from a torn-down call are
/// recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

// ---------------------------------------------------------------------------
// Media handles
// ---------------------------------------------------------------------------

/// Handle to the locally captured camera/microphone stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalStream(pub u64);

/// Handle to the media stream received from the remote party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteStream(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_serializes_as_plain_string() {
        let id = SessionId::from("a1");
        let bytes = serde_cbor::to_vec(&id).unwrap();
        let plain = serde_cbor::to_vec(&"a1").unwrap();
        assert_eq!(bytes, plain);
        assert_eq!(id.to_string(), "a1");
    }
}
