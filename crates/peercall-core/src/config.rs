//! TOML configuration for the relay server and for endpoints.
//!
//! Every field has a default, so an empty (or missing) file is valid.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::adapters::quic::codec::DEFAULT_MAX_FRAME_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayServerConfig {
    pub bind_addr: SocketAddr,
    /// Connections silent for this long are dropped (and reported as
    /// disconnected to everyone else).
    pub idle_timeout_secs: u64,
    pub max_frame_len: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4433)),
            idle_timeout_secs: 30,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl RelayServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub relay_addr: SocketAddr,
    /// TLS server name presented to the relay.
    pub server_name: String,
    /// Label attached to outgoing call requests.
    pub display_name: Option<String>,
    /// Give up on unanswered calls after this many seconds. Off when unset or 0.
    pub dial_timeout_secs: Option<u64>,
    /// Keeps the otherwise silent relay connection open during long calls.
    pub keep_alive_secs: u64,
    pub max_frame_len: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            relay_addr: SocketAddr::from(([127, 0, 0, 1], 4433)),
            server_name: "localhost".into(),
            display_name: None,
            dial_timeout_secs: None,
            keep_alive_secs: 10,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl EndpointConfig {
    pub fn dial_timeout(&self) -> Option<Duration> {
        self.dial_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Load a config from a TOML file, or defaults when no path is given.
pub fn load<T>(path: Option<&Path>) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}
