//! In-memory fakes for the ports, shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::domain::call::{CallPhase, EndReason, NegotiationRole};
use crate::domain::identity::{LocalStream, RemoteStream, SessionId};
use crate::domain::signal::{NegotiationPayload, Signal};

use super::input::EngineEventSink;
use super::ports::{
    CallEvents, MediaCapture, NegotiationEngine, NegotiationFactory, RelayEvent, SignalRelay,
};

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

pub struct RecordingRelay {
    sent: Mutex<Vec<(SessionId, Signal)>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<RelayEvent>>,
    closed: Notify,
}

impl RecordingRelay {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound: tokio::sync::Mutex::new(rx),
            closed: Notify::new(),
        });
        (relay, tx)
    }

    pub fn sent(&self) -> Vec<(SessionId, Signal)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalRelay for RecordingRelay {
    async fn send_signal(&self, to: &SessionId, signal: Signal) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((to.clone(), signal));
        Ok(())
    }

    async fn next_event(&self) -> anyhow::Result<RelayEvent> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            event = inbound.recv() => event.ok_or_else(|| anyhow::anyhow!("relay closed")),
            _ = self.closed.notified() => anyhow::bail!("relay closed"),
        }
    }

    fn close(&self) {
        self.closed.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Media capture
// ---------------------------------------------------------------------------

pub struct FakeCapture {
    denied: AtomicBool,
    next_stream: AtomicU64,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            denied: AtomicBool::new(false),
            next_stream: AtomicU64::new(1),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn deny(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released()
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire(&self) -> anyhow::Result<LocalStream> {
        if self.denied.load(Ordering::SeqCst) {
            anyhow::bail!("permission denied");
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalStream(self.next_stream.fetch_add(1, Ordering::SeqCst)))
    }

    fn release(&self, _stream: LocalStream) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Negotiation engines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeEngineState {
    pub role: NegotiationRole,
    pub stream: LocalStream,
    pub accepted: Vec<NegotiationPayload>,
    pub destroy_calls: usize,
}

impl FakeEngineState {
    pub fn destroyed(&self) -> bool {
        self.destroy_calls > 0
    }
}

struct FakeEngine {
    state: Arc<Mutex<FakeEngineState>>,
    sink: EngineEventSink,
    scripted: bool,
}

impl NegotiationEngine for FakeEngine {
    fn accept_payload(&mut self, payload: NegotiationPayload) -> anyhow::Result<()> {
        let role = {
            let mut state = self.state.lock().unwrap();
            if state.destroyed() {
                anyhow::bail!("engine destroyed");
            }
            state.accepted.push(payload);
            state.role
        };
        if self.scripted {
            if role == NegotiationRole::Responder {
                self.sink
                    .payload_ready(NegotiationPayload::new(b"answer".to_vec()));
            }
            self.sink
                .stream_ready(RemoteStream(self.sink.call_id().0));
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.state.lock().unwrap().destroy_calls += 1;
    }
}

/// Records every engine it creates. In scripted mode the engines behave like
/// a trickle-free offer/answer exchange on their own.
pub struct FakeEngines {
    engines: Mutex<Vec<Arc<Mutex<FakeEngineState>>>>,
    fail_create: AtomicBool,
    scripted: AtomicBool,
}

impl FakeEngines {
    pub fn new() -> Self {
        Self {
            engines: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            scripted: AtomicBool::new(false),
        }
    }

    pub fn scripted() -> Self {
        let engines = Self::new();
        engines.script_replies();
        engines
    }

    pub fn script_replies(&self) {
        self.scripted.store(true, Ordering::SeqCst);
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    pub fn engine(&self, index: usize) -> FakeEngineState {
        self.engines.lock().unwrap()[index].lock().unwrap().clone()
    }

    pub fn all_destroyed(&self) -> bool {
        self.engines
            .lock()
            .unwrap()
            .iter()
            .all(|e| e.lock().unwrap().destroyed())
    }
}

impl NegotiationFactory for FakeEngines {
    fn create(
        &self,
        role: NegotiationRole,
        stream: LocalStream,
        sink: EngineEventSink,
    ) -> anyhow::Result<Box<dyn NegotiationEngine>> {
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("no negotiation backend");
        }
        let state = Arc::new(Mutex::new(FakeEngineState {
            role,
            stream,
            accepted: Vec::new(),
            destroy_calls: 0,
        }));
        self.engines.lock().unwrap().push(state.clone());

        let scripted = self.scripted.load(Ordering::SeqCst);
        if scripted && role == NegotiationRole::Initiator {
            sink.payload_ready(NegotiationPayload::new(
                format!("offer-{}", stream.0).into_bytes(),
            ));
        }
        Ok(Box::new(FakeEngine {
            state,
            sink,
            scripted,
        }))
    }
}

// ---------------------------------------------------------------------------
// App events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Identity(Option<SessionId>),
    Phase(CallPhase),
    Incoming(SessionId, Option<String>),
    RemoteStream(RemoteStream),
    Ended(Option<SessionId>, EndReason),
}

pub struct RecordingEvents {
    events: Mutex<Vec<AppEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn phases(&self) -> Vec<CallPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Phase(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn ended_reasons(&self) -> Vec<EndReason> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Ended(_, reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: AppEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl CallEvents for RecordingEvents {
    async fn emit_identity(&self, id: Option<&SessionId>) {
        self.push(AppEvent::Identity(id.cloned()));
    }

    async fn emit_phase(&self, phase: CallPhase) {
        self.push(AppEvent::Phase(phase));
    }

    async fn emit_incoming_call(&self, from: &SessionId, display_name: Option<&str>) {
        self.push(AppEvent::Incoming(
            from.clone(),
            display_name.map(str::to_owned),
        ));
    }

    async fn emit_remote_stream(&self, stream: RemoteStream) {
        self.push(AppEvent::RemoteStream(stream));
    }

    async fn emit_call_ended(&self, remote: Option<&SessionId>, reason: &EndReason) {
        self.push(AppEvent::Ended(remote.cloned(), reason.clone()));
    }
}
