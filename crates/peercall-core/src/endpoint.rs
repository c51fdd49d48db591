//! Composition root: wires a relay adapter, media capture, a negotiation
//! backend and a UI sink into a running [`CallLoop`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::quic::client::QuicRelayClient;
use crate::application::call_loop::{spawn_relay_pump, CallHandle, CallLoop};
use crate::application::ports::{CallEvents, MediaCapture, NegotiationFactory, SignalRelay};
use crate::config::EndpointConfig;
use crate::domain::call::CallError;
use crate::domain::identity::SessionId;

/// A running call endpoint. Dropping it hangs up and stops the loop.
pub struct Endpoint {
    handle: CallHandle,
    relay: Arc<dyn SignalRelay>,
    display_name: Option<String>,
    loop_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Connect to the QUIC relay named in `config` and start the call loop.
    pub async fn connect(
        config: &EndpointConfig,
        capture: Arc<dyn MediaCapture>,
        engines: Arc<dyn NegotiationFactory>,
        app_events: Arc<dyn CallEvents>,
    ) -> anyhow::Result<Self> {
        let relay: Arc<dyn SignalRelay> = QuicRelayClient::connect(config).await?;
        Ok(Self::start(
            relay,
            capture,
            engines,
            app_events,
            config.display_name.clone(),
            config.dial_timeout(),
        ))
    }

    /// Start the call loop over an already connected relay.
    pub fn start(
        relay: Arc<dyn SignalRelay>,
        capture: Arc<dyn MediaCapture>,
        engines: Arc<dyn NegotiationFactory>,
        app_events: Arc<dyn CallEvents>,
        display_name: Option<String>,
        dial_timeout: Option<Duration>,
    ) -> Self {
        let (call_loop, handle) =
            CallLoop::new(Arc::clone(&relay), capture, engines, app_events, dial_timeout);
        let pump_task = spawn_relay_pump(Arc::clone(&relay), call_loop.sender());
        let loop_task = tokio::spawn(call_loop.run());
        info!("Endpoint started");

        Self {
            handle,
            relay,
            display_name,
            loop_task: Some(loop_task),
            pump_task: Some(pump_task),
        }
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    /// Dial `remote`, announcing the configured display name.
    pub async fn dial(&self, remote: SessionId) -> Result<(), CallError> {
        self.handle.dial(remote, self.display_name.clone()).await
    }

    /// Hang up any call, stop the loop and close the relay connection.
    pub async fn shutdown(&mut self) {
        self.handle.shutdown();
        if let Some(task) = self.loop_task.take() {
            if let Err(e) = task.await {
                warn!("Call loop task failed: {e}");
            }
        }
        self.relay.close();
        if let Some(task) = self.pump_task.take() {
            if let Err(e) = task.await {
                warn!("Relay pump task failed: {e}");
            }
        }
        info!("Endpoint stopped");
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.loop_task.is_some() {
            self.handle.shutdown();
        }
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
    }
}
