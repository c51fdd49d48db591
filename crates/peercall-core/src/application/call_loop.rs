//! CallLoop: the single consumer that serializes every input into the
//! [`CallMachine`].
//!
//! Relay events, engine callbacks, timers and UI intents can originate on
//! different tasks; they all land in one mpsc queue and are handled to
//! completion one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::call::{CallError, CallSnapshot};
use crate::domain::identity::SessionId;

use super::call_machine::CallMachine;
use super::input::{CallInput, UserIntent};
use super::ports::{CallEvents, MediaCapture, NegotiationFactory, RelayEvent, SignalRelay};

pub struct CallLoop {
    machine: CallMachine,
    inputs: mpsc::UnboundedReceiver<CallInput>,
    tx: mpsc::UnboundedSender<CallInput>,
    dial_timeout: Option<Duration>,
}

impl CallLoop {
    pub fn new(
        relay: Arc<dyn SignalRelay>,
        capture: Arc<dyn MediaCapture>,
        engines: Arc<dyn NegotiationFactory>,
        app_events: Arc<dyn CallEvents>,
        dial_timeout: Option<Duration>,
    ) -> (Self, CallHandle) {
        let (tx, inputs) = mpsc::unbounded_channel();
        let machine = CallMachine::new(relay, capture, engines, app_events, tx.clone());
        let handle = CallHandle { tx: tx.clone() };
        (
            Self {
                machine,
                inputs,
                tx,
                dial_timeout,
            },
            handle,
        )
    }

    /// Sender for additional input sources (the relay pump).
    pub fn sender(&self) -> mpsc::UnboundedSender<CallInput> {
        self.tx.clone()
    }

    /// Process inputs until a shutdown is requested.
    pub async fn run(mut self) {
        info!("Call loop started");
        while let Some(input) = self.inputs.recv().await {
            if matches!(input, CallInput::Shutdown) {
                let _ = self.machine.hangup().await;
                break;
            }
            self.handle(input).await;
        }
        info!("Call loop stopped");
    }

    async fn handle(&mut self, input: CallInput) {
        match input {
            CallInput::Intent { intent, reply } => {
                let is_dial = matches!(intent, UserIntent::Dial { .. });
                let name = intent.name();
                let result = self.machine.handle_intent(intent).await;
                match &result {
                    Ok(()) if is_dial => self.arm_dial_timeout(),
                    Ok(()) => {}
                    Err(e) => warn!(intent = name, "Intent refused: {e}"),
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            CallInput::Relay(event) => {
                if let Err(e) = self.machine.handle_relay_event(event).await {
                    warn!("Relay event discarded: {e}");
                }
            }
            CallInput::Engine { call_id, event } => {
                if let Err(e) = self.machine.handle_engine_event(call_id, event).await {
                    warn!(?call_id, "Engine event ended the call: {e}");
                }
            }
            CallInput::DialTimeout(call_id) => {
                self.machine.handle_dial_timeout(call_id).await;
            }
            CallInput::Snapshot(reply) => {
                let _ = reply.send(self.machine.snapshot());
            }
            CallInput::Shutdown => {}
        }
    }

    fn arm_dial_timeout(&self) {
        let (Some(timeout), Some(call_id)) = (self.dial_timeout, self.machine.current_call_id())
        else {
            return;
        };
        debug!(?call_id, ?timeout, "Dial timeout armed");
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(CallInput::DialTimeout(call_id));
        });
    }
}

/// Forward relay events into the call loop until the relay connection ends.
pub fn spawn_relay_pump(
    relay: Arc<dyn SignalRelay>,
    tx: mpsc::UnboundedSender<CallInput>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match relay.next_event().await {
                Ok(event) => {
                    if tx.send(CallInput::Relay(event)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    info!("Relay connection closed: {e}");
                    let _ = tx.send(CallInput::Relay(RelayEvent::ConnectionLost));
                    break;
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// CallHandle
// ---------------------------------------------------------------------------

/// Cloneable front door for the UI layer.
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallInput>,
}

impl CallHandle {
    pub async fn dial(
        &self,
        remote: SessionId,
        display_name: Option<String>,
    ) -> Result<(), CallError> {
        self.request(UserIntent::Dial {
            remote,
            display_name,
        })
        .await
    }

    pub async fn answer(&self) -> Result<(), CallError> {
        self.request(UserIntent::Answer).await
    }

    pub async fn reject(&self) -> Result<(), CallError> {
        self.request(UserIntent::Reject).await
    }

    pub async fn hangup(&self) -> Result<(), CallError> {
        self.request(UserIntent::Hangup).await
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot, CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CallInput::Snapshot(reply))
            .map_err(|_| CallError::LoopClosed)?;
        rx.await.map_err(|_| CallError::LoopClosed)
    }

    /// Ask the loop to hang up and stop. Does not wait.
    pub fn shutdown(&self) {
        let _ = self.tx.send(CallInput::Shutdown);
    }

    async fn request(&self, intent: UserIntent) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CallInput::Intent {
                intent,
                reply: Some(reply),
            })
            .map_err(|_| CallError::LoopClosed)?;
        rx.await.map_err(|_| CallError::LoopClosed)?
    }
}
