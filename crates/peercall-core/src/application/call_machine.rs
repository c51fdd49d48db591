//! Call state machine: owns the single call descriptor of one endpoint.
//!
//! Reacts to one input at a time (user intents, relay events, negotiation
//! engine callbacks) and decides which collaborator has to do what. Payloads
//! are forwarded between engine and relay untouched.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::call::{CallError, CallPhase, CallRole, CallSnapshot, EndReason};
use crate::domain::identity::{CallId, LocalStream, SessionId};
use crate::domain::signal::{NegotiationPayload, Signal};

use super::input::{CallInput, EngineEvent, EngineEventSink, UserIntent};
use super::ports::{
    CallEvents, MediaCapture, NegotiationEngine, NegotiationFactory, RelayEvent, SignalRelay,
};

// ---------------------------------------------------------------------------
// Call descriptor
// ---------------------------------------------------------------------------

/// The negotiation slot of a call.
///
/// A callee reserves the slot while ringing and creates the engine only once
/// the user answers.
enum NegotiationHandle {
    Reserved,
    Engine(Box<dyn NegotiationEngine>),
}

impl NegotiationHandle {
    fn destroy(&mut self) {
        if let Self::Engine(engine) = self {
            engine.destroy();
        }
    }
}

impl Drop for NegotiationHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct CallDescriptor {
    id: CallId,
    role: CallRole,
    phase: CallPhase,
    remote: SessionId,
    display_name: Option<String>,
    pending_payload: Option<NegotiationPayload>,
    handle: NegotiationHandle,
    /// Our one outbound payload (request or acceptance) went out.
    local_payload_sent: bool,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub struct CallMachine {
    relay: Arc<dyn SignalRelay>,
    capture: Arc<dyn MediaCapture>,
    engines: Arc<dyn NegotiationFactory>,
    app_events: Arc<dyn CallEvents>,
    /// Handed (tagged) to every engine so its callbacks land in our queue.
    inputs: mpsc::UnboundedSender<CallInput>,
    local_identity: Option<SessionId>,
    local_stream: Option<LocalStream>,
    call: Option<CallDescriptor>,
    next_call_id: u64,
}

impl CallMachine {
    pub fn new(
        relay: Arc<dyn SignalRelay>,
        capture: Arc<dyn MediaCapture>,
        engines: Arc<dyn NegotiationFactory>,
        app_events: Arc<dyn CallEvents>,
        inputs: mpsc::UnboundedSender<CallInput>,
    ) -> Self {
        Self {
            relay,
            capture,
            engines,
            app_events,
            inputs,
            local_identity: None,
            local_stream: None,
            call: None,
            next_call_id: 1,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.call.as_ref().map_or(CallPhase::Idle, |c| c.phase)
    }

    pub fn current_call_id(&self) -> Option<CallId> {
        self.call.as_ref().map(|c| c.id)
    }

    pub fn local_identity(&self) -> Option<&SessionId> {
        self.local_identity.as_ref()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let call = self.call.as_ref();
        CallSnapshot {
            call_id: call.map(|c| c.id),
            phase: self.phase(),
            role: call.map(|c| c.role),
            local_identity: self.local_identity.clone(),
            remote_identity: call.map(|c| c.remote.clone()),
            display_name: call.and_then(|c| c.display_name.clone()),
            has_pending_payload: call.is_some_and(|c| c.pending_payload.is_some()),
            has_negotiation_handle: call.is_some(),
            has_engine: call.is_some_and(|c| matches!(c.handle, NegotiationHandle::Engine(_))),
            holds_local_stream: self.local_stream.is_some(),
        }
    }

    // -----------------------------------------------------------------------
    // User intents
    // -----------------------------------------------------------------------

    pub async fn handle_intent(&mut self, intent: UserIntent) -> Result<(), CallError> {
        match intent {
            UserIntent::Dial {
                remote,
                display_name,
            } => self.dial(remote, display_name).await,
            UserIntent::Answer => self.answer().await,
            UserIntent::Reject => self.reject().await,
            UserIntent::Hangup => self.hangup().await,
        }
    }

    /// Idle -> Dialing. The call-request goes out once the engine has its offer.
    pub async fn dial(
        &mut self,
        remote: SessionId,
        display_name: Option<String>,
    ) -> Result<(), CallError> {
        let local = self.local_identity.clone().ok_or(CallError::NotRegistered)?;
        if let Some(call) = &self.call {
            return Err(CallError::Busy(call.phase));
        }
        if remote == local {
            return Err(CallError::ProtocolViolation(
                "cannot call our own session".into(),
            ));
        }

        let stream = self.ensure_local_stream().await?;
        let call_id = self.allocate_call_id();
        let engine = match self
            .engines
            .create(CallRole::Caller.into(), stream, self.sink(call_id))
        {
            Ok(engine) => engine,
            Err(e) => {
                warn!(?call_id, %remote, "Failed to create initiator engine: {e}");
                self.release_local_stream();
                return Err(CallError::NegotiationFailure(e.to_string()));
            }
        };

        info!(?call_id, %remote, "Dialing");
        self.call = Some(CallDescriptor {
            id: call_id,
            role: CallRole::Caller,
            phase: CallPhase::Dialing,
            remote,
            display_name,
            pending_payload: None,
            handle: NegotiationHandle::Engine(engine),
            local_payload_sent: false,
        });
        self.app_events.emit_phase(CallPhase::Dialing).await;
        Ok(())
    }

    /// Ringing -> Negotiating: create the responder engine and hand it the offer.
    pub async fn answer(&mut self) -> Result<(), CallError> {
        let call_id = match &self.call {
            Some(call) if call.phase == CallPhase::Ringing => call.id,
            _ => {
                return Err(CallError::InvalidIntent {
                    intent: "answer",
                    phase: self.phase(),
                })
            }
        };

        let stream = match self.ensure_local_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                self.end_call(EndReason::CapabilityUnavailable).await;
                return Err(e);
            }
        };

        let mut engine = match self
            .engines
            .create(CallRole::Callee.into(), stream, self.sink(call_id))
        {
            Ok(engine) => engine,
            Err(e) => {
                let reason = e.to_string();
                self.end_call(EndReason::NegotiationFailed(reason.clone()))
                    .await;
                return Err(CallError::NegotiationFailure(reason));
            }
        };

        let Some(offer) = self.call.as_mut().and_then(|c| c.pending_payload.take()) else {
            engine.destroy();
            let reason = "ringing without a pending offer".to_string();
            self.end_call(EndReason::NegotiationFailed(reason.clone()))
                .await;
            return Err(CallError::NegotiationFailure(reason));
        };

        if let Err(e) = engine.accept_payload(offer) {
            engine.destroy();
            let reason = e.to_string();
            self.end_call(EndReason::NegotiationFailed(reason.clone()))
                .await;
            return Err(CallError::NegotiationFailure(reason));
        }

        if let Some(call) = self.call.as_mut() {
            call.handle = NegotiationHandle::Engine(engine);
            call.phase = CallPhase::Negotiating;
            info!(?call_id, remote = %call.remote, "Answered, negotiating");
        }
        self.app_events.emit_phase(CallPhase::Negotiating).await;
        Ok(())
    }

    /// Ringing -> Idle. Nothing is sent back to the caller.
    pub async fn reject(&mut self) -> Result<(), CallError> {
        match self.phase() {
            CallPhase::Ringing => {
                self.end_call(EndReason::Rejected).await;
                Ok(())
            }
            phase => Err(CallError::InvalidIntent {
                intent: "reject",
                phase,
            }),
        }
    }

    /// Any phase -> Idle. Safe to call repeatedly.
    pub async fn hangup(&mut self) -> Result<(), CallError> {
        let Some(notify) = self.call.as_ref().map(|call| {
            let reachable = match call.phase {
                CallPhase::Dialing => call.local_payload_sent,
                CallPhase::Negotiating | CallPhase::Active => true,
                _ => false,
            };
            reachable.then(|| call.remote.clone())
        }) else {
            debug!("Hangup while idle");
            self.release_local_stream();
            return Ok(());
        };

        if let Some(remote) = notify {
            if let Err(e) = self.relay.send_signal(&remote, Signal::CallEnded).await {
                warn!(%remote, "Failed to send call-ended: {e}");
            }
        }

        self.end_call(EndReason::LocalHangup).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Relay events
    // -----------------------------------------------------------------------

    pub async fn handle_relay_event(&mut self, event: RelayEvent) -> Result<(), CallError> {
        match event {
            RelayEvent::IdentityAssigned(id) => {
                self.on_identity_assigned(id).await;
                Ok(())
            }
            RelayEvent::Signal { from, signal } => self.on_signal(from, signal).await,
            RelayEvent::PeerDisconnected(id) | RelayEvent::Undeliverable(id) => {
                self.on_peer_gone(id).await;
                Ok(())
            }
            RelayEvent::ConnectionLost => {
                self.on_connection_lost().await;
                Ok(())
            }
        }
    }

    async fn on_identity_assigned(&mut self, id: SessionId) {
        if self.local_identity.as_ref() == Some(&id) {
            return;
        }
        let previous = self.local_identity.replace(id.clone());
        info!(%id, ?previous, "Session identity assigned");
        self.app_events.emit_identity(Some(&id)).await;

        // Our old address is gone; the remote can no longer reach us.
        if previous.is_some() && self.call.is_some() {
            self.end_call(EndReason::PeerUnreachable).await;
        }
    }

    async fn on_signal(&mut self, from: SessionId, signal: Signal) -> Result<(), CallError> {
        match signal {
            Signal::CallRequest {
                from: claimed,
                display_name,
                payload,
            } => {
                if claimed != from {
                    return Err(CallError::ProtocolViolation(format!(
                        "call-request claims to be from {claimed} but was relayed from {from}"
                    )));
                }
                self.on_call_request(from, display_name, payload).await
            }
            Signal::CallAccepted { payload } => self.on_call_accepted(from, payload).await,
            Signal::CallEnded => {
                if !self.is_current_remote(&from) {
                    return Err(CallError::ProtocolViolation(format!(
                        "call-ended from {from}, which is not our peer"
                    )));
                }
                self.end_call(EndReason::RemoteHangup).await;
                Ok(())
            }
        }
    }

    /// Idle -> Ringing. The engine is created only when the user answers.
    async fn on_call_request(
        &mut self,
        from: SessionId,
        display_name: Option<String>,
        payload: NegotiationPayload,
    ) -> Result<(), CallError> {
        if let Some(call) = &self.call {
            // First call wins; the newcomer is dropped without a reply.
            warn!(
                %from,
                current = %call.remote,
                phase = %call.phase,
                "Busy, dropping incoming call-request"
            );
            return Ok(());
        }
        if self.local_identity.as_ref() == Some(&from) {
            return Err(CallError::ProtocolViolation(
                "call-request from our own session".into(),
            ));
        }

        let call_id = self.allocate_call_id();
        info!(?call_id, %from, ?display_name, offer_len = payload.len(), "Incoming call");
        self.app_events
            .emit_incoming_call(&from, display_name.as_deref())
            .await;
        self.call = Some(CallDescriptor {
            id: call_id,
            role: CallRole::Callee,
            phase: CallPhase::Ringing,
            remote: from,
            display_name,
            pending_payload: Some(payload),
            handle: NegotiationHandle::Reserved,
            local_payload_sent: false,
        });
        self.app_events.emit_phase(CallPhase::Ringing).await;
        Ok(())
    }

    /// Dialing -> Negotiating: feed the answer to our initiator engine.
    async fn on_call_accepted(
        &mut self,
        from: SessionId,
        payload: NegotiationPayload,
    ) -> Result<(), CallError> {
        let Some(call) = self.call.as_mut() else {
            return Err(CallError::ProtocolViolation(format!(
                "call-accepted from {from} while idle"
            )));
        };
        if call.remote != from {
            return Err(CallError::ProtocolViolation(format!(
                "call-accepted from {from}, but we are calling {}",
                call.remote
            )));
        }
        if call.role != CallRole::Caller {
            return Err(CallError::ProtocolViolation(
                "call-accepted received by the callee".into(),
            ));
        }
        match call.phase {
            CallPhase::Dialing if call.local_payload_sent => {}
            CallPhase::Dialing => {
                return Err(CallError::ProtocolViolation(
                    "call-accepted before our call-request went out".into(),
                ))
            }
            phase => {
                return Err(CallError::ProtocolViolation(format!(
                    "duplicate call-accepted while {phase}"
                )))
            }
        }

        call.phase = CallPhase::Negotiating;
        let call_id = call.id;
        let result = match &mut call.handle {
            NegotiationHandle::Engine(engine) => engine.accept_payload(payload),
            NegotiationHandle::Reserved => Err(anyhow::anyhow!("caller has no engine")),
        };

        match result {
            Ok(()) => {
                info!(?call_id, %from, "Call accepted, negotiating");
                self.app_events.emit_phase(CallPhase::Negotiating).await;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.end_call(EndReason::NegotiationFailed(reason.clone()))
                    .await;
                Err(CallError::NegotiationFailure(reason))
            }
        }
    }

    async fn on_peer_gone(&mut self, id: SessionId) {
        if !self.is_current_remote(&id) {
            debug!(%id, "Ignoring departure of unrelated endpoint");
            return;
        }
        warn!(remote = %id, phase = %self.phase(), "Peer gone");
        self.end_call(EndReason::PeerUnreachable).await;
    }

    async fn on_connection_lost(&mut self) {
        warn!("Lost connection to the relay");
        if self.local_identity.take().is_some() {
            self.app_events.emit_identity(None).await;
        }
        // An active call already has its direct media path.
        if self.call.as_ref().is_some_and(|c| c.phase != CallPhase::Active) {
            self.end_call(EndReason::PeerUnreachable).await;
        }
    }

    // -----------------------------------------------------------------------
    // Engine events
    // -----------------------------------------------------------------------

    pub async fn handle_engine_event(
        &mut self,
        call_id: CallId,
        event: EngineEvent,
    ) -> Result<(), CallError> {
        let Some(call) = self.call.as_mut().filter(|c| c.id == call_id) else {
            debug!(?call_id, ?event, "Dropping event from a finished call");
            return Ok(());
        };

        match event {
            EngineEvent::PayloadReady(payload) => {
                if call.local_payload_sent {
                    debug!(?call_id, "Only the first payload is forwarded");
                    return Ok(());
                }
                let signal = match (call.role, call.phase) {
                    (CallRole::Caller, CallPhase::Dialing) => {
                        let Some(from) = self.local_identity.clone() else {
                            self.end_call(EndReason::PeerUnreachable).await;
                            return Err(CallError::NotRegistered);
                        };
                        Signal::CallRequest {
                            from,
                            display_name: call.display_name.clone(),
                            payload,
                        }
                    }
                    // The engine may report the remote stream before its answer.
                    (CallRole::Callee, CallPhase::Negotiating | CallPhase::Active) => {
                        Signal::CallAccepted { payload }
                    }
                    (_, phase) => {
                        debug!(?call_id, %phase, "payload-ready ignored");
                        return Ok(());
                    }
                };

                call.local_payload_sent = true;
                let remote = call.remote.clone();
                let kind = signal.kind();
                if let Err(e) = self.relay.send_signal(&remote, signal).await {
                    warn!(?call_id, %remote, kind, "Failed to relay signal: {e}");
                    self.end_call(EndReason::PeerUnreachable).await;
                    return Err(CallError::PeerUnreachable(remote));
                }
                info!(?call_id, %remote, kind, "Signal sent");
                Ok(())
            }

            EngineEvent::StreamReady(stream) => {
                if call.phase != CallPhase::Negotiating {
                    debug!(?call_id, phase = %call.phase, "stream-ready ignored");
                    return Ok(());
                }
                call.phase = CallPhase::Active;
                info!(?call_id, remote = %call.remote, "Call active");
                self.app_events.emit_remote_stream(stream).await;
                self.app_events.emit_phase(CallPhase::Active).await;
                Ok(())
            }

            EngineEvent::Failure(reason) => {
                warn!(?call_id, %reason, "Negotiation engine failed");
                self.end_call(EndReason::NegotiationFailed(reason.clone()))
                    .await;
                Err(CallError::NegotiationFailure(reason))
            }
        }
    }

    /// Give up on an unanswered call. Fired by the call loop's optional timer.
    pub async fn handle_dial_timeout(&mut self, call_id: CallId) {
        let Some(withdraw) = self
            .call
            .as_ref()
            .filter(|c| c.id == call_id && c.phase == CallPhase::Dialing)
            .map(|c| c.local_payload_sent.then(|| c.remote.clone()))
        else {
            return;
        };

        if let Some(remote) = withdraw {
            if let Err(e) = self.relay.send_signal(&remote, Signal::CallEnded).await {
                warn!(%remote, "Failed to withdraw call-request: {e}");
            }
        }
        self.end_call(EndReason::DialTimeout).await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Ended -> Idle: destroy the engine, stop local media, forget the peer.
    async fn end_call(&mut self, reason: EndReason) {
        let Some(mut call) = self.call.take() else {
            return;
        };
        info!(call_id = ?call.id, remote = %call.remote, %reason, "Ending call");
        self.app_events.emit_phase(CallPhase::Ended).await;

        call.handle.destroy();
        self.release_local_stream();

        self.app_events
            .emit_call_ended(Some(&call.remote), &reason)
            .await;
        self.app_events.emit_phase(CallPhase::Idle).await;
    }

    async fn ensure_local_stream(&mut self) -> Result<LocalStream, CallError> {
        if let Some(stream) = self.local_stream {
            return Ok(stream);
        }
        match self.capture.acquire().await {
            Ok(stream) => {
                self.local_stream = Some(stream);
                Ok(stream)
            }
            Err(e) => {
                warn!("Media capture unavailable: {e}");
                Err(CallError::CapabilityUnavailable(e.to_string()))
            }
        }
    }

    fn release_local_stream(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            self.capture.release(stream);
        }
    }

    fn is_current_remote(&self, id: &SessionId) -> bool {
        self.call.as_ref().is_some_and(|c| &c.remote == id)
    }

    fn allocate_call_id(&mut self) -> CallId {
        let id = CallId(self.next_call_id);
        self.next_call_id += 1;
        id
    }

    fn sink(&self, call_id: CallId) -> EngineEventSink {
        EngineEventSink::new(call_id, self.inputs.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
