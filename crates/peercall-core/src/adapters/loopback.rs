//! In-process [`SignalRelay`] adapter.
//!
//! A [`LoopbackHub`] plays the relay server for endpoints living in the same
//! process, with the same routing rules as the QUIC relay: identity on
//! connect, `Undeliverable` for unknown addressees, `PeerDisconnected`
//! broadcast on close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::application::ports::{RelayEvent, SignalRelay};
use crate::domain::identity::SessionId;
use crate::domain::signal::Signal;

use super::registry::SessionRegistry;

type Outbox = mpsc::UnboundedSender<RelayEvent>;

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

pub struct LoopbackHub {
    registry: Mutex<SessionRegistry<Outbox>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(SessionRegistry::new()),
        })
    }

    /// Attach a new endpoint. Its first event is `IdentityAssigned`.
    pub fn connect(self: &Arc<Self>) -> Arc<LoopbackRelay> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry().register(|_| tx.clone());
        let _ = tx.send(RelayEvent::IdentityAssigned(id.clone()));
        info!(%id, "Loopback endpoint connected");

        Arc::new(LoopbackRelay {
            id,
            hub: Arc::clone(self),
            inbound: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }

    pub fn connected(&self) -> usize {
        self.registry().len()
    }

    fn route(&self, from: &SessionId, to: &SessionId, signal: Signal) {
        let registry = self.registry();
        let delivered = registry.get(to).is_some_and(|target| {
            target
                .send(RelayEvent::Signal {
                    from: from.clone(),
                    signal,
                })
                .is_ok()
        });
        if !delivered {
            debug!(%from, %to, "No such endpoint, bouncing");
            if let Some(sender) = registry.get(from) {
                let _ = sender.send(RelayEvent::Undeliverable(to.clone()));
            }
        }
    }

    fn disconnect(&self, id: &SessionId) {
        let mut registry = self.registry();
        if registry.remove(id).is_none() {
            return;
        }
        for (_, outbox) in registry.others(id) {
            let _ = outbox.send(RelayEvent::PeerDisconnected(id.clone()));
        }
        info!(%id, "Loopback endpoint disconnected");
    }

    fn registry(&self) -> MutexGuard<'_, SessionRegistry<Outbox>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Per-endpoint relay handle
// ---------------------------------------------------------------------------

pub struct LoopbackRelay {
    id: SessionId,
    hub: Arc<LoopbackHub>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<RelayEvent>>,
    closed: AtomicBool,
}

impl LoopbackRelay {
    pub fn session_id(&self) -> &SessionId {
        &self.id
    }
}

#[async_trait]
impl SignalRelay for LoopbackRelay {
    async fn send_signal(&self, to: &SessionId, signal: Signal) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("loopback relay closed");
        }
        self.hub.route(&self.id, to, signal);
        Ok(())
    }

    async fn next_event(&self) -> anyhow::Result<RelayEvent> {
        let mut inbound = self.inbound.lock().await;
        inbound
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("loopback relay closed"))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Dropping our outbox ends `next_event`.
            self.hub.disconnect(&self.id);
        }
    }
}

impl Drop for LoopbackRelay {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn expect_identity(relay: &LoopbackRelay) -> SessionId {
        match relay.next_event().await.unwrap() {
            RelayEvent::IdentityAssigned(id) => id,
            other => panic!("expected identity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn routes_between_endpoints() {
        let hub = LoopbackHub::new();
        let a = hub.connect();
        let b = hub.connect();
        assert_eq!(&expect_identity(&a).await, a.session_id());
        let b_id = expect_identity(&b).await;

        a.send_signal(&b_id, Signal::CallEnded).await.unwrap();
        assert_eq!(
            b.next_event().await.unwrap(),
            RelayEvent::Signal {
                from: a.session_id().clone(),
                signal: Signal::CallEnded
            }
        );
    }

    #[tokio::test]
    async fn unknown_addressee_bounces() {
        let hub = LoopbackHub::new();
        let a = hub.connect();
        expect_identity(&a).await;

        a.send_signal(&"nobody".into(), Signal::CallEnded)
            .await
            .unwrap();
        assert_eq!(
            a.next_event().await.unwrap(),
            RelayEvent::Undeliverable("nobody".into())
        );
    }

    #[tokio::test]
    async fn close_notifies_the_others() {
        let hub = LoopbackHub::new();
        let a = hub.connect();
        let b = hub.connect();
        expect_identity(&b).await;
        let a_id = a.session_id().clone();

        a.close();
        a.close();
        assert_eq!(hub.connected(), 1);
        assert_eq!(
            b.next_event().await.unwrap(),
            RelayEvent::PeerDisconnected(a_id)
        );

        // a's own queue still holds its identity, then ends.
        expect_identity(&a).await;
        assert!(a.next_event().await.is_err());
        assert!(a.send_signal(b.session_id(), Signal::CallEnded).await.is_err());
    }
}
