//! Quinn-based QUIC signaling relay.
//!
//! Accepts endpoint connections, hands each one a session identity and
//! forwards `Route` frames to the addressed session. The relay never looks
//! inside a signal.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{Connection, Endpoint, RecvStream, SendStream, ServerConfig};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::RelayServerConfig;
use crate::domain::identity::SessionId;
use crate::domain::signal::{RelayFrame, Signal};

use super::codec::{read_frame, write_frame, CborFrameCodec};
use crate::adapters::registry::SessionRegistry;

// ---------------------------------------------------------------------------
// Per-session connection state on the server
// ---------------------------------------------------------------------------

struct PeerConn {
    id: SessionId,
    connection: Connection,
    control_send: Mutex<SendStream>,
    // recv is handled by the per-session task
}

// ---------------------------------------------------------------------------
// Relay server
// ---------------------------------------------------------------------------

pub struct RelayServer {
    endpoint: Endpoint,
    sessions: RwLock<SessionRegistry<Arc<PeerConn>>>,
    codec: CborFrameCodec,
    max_frame_len: usize,
}

impl RelayServer {
    /// Create and bind the server.
    pub fn new(config: &RelayServerConfig) -> anyhow::Result<Self> {
        let server_config = Self::generate_self_signed_config(config)?;
        let endpoint = Endpoint::server(server_config, config.bind_addr)?;
        info!(bind_addr = %endpoint.local_addr()?, "Relay listening");

        Ok(Self {
            endpoint,
            sessions: RwLock::new(SessionRegistry::new()),
            codec: CborFrameCodec,
            max_frame_len: config.max_frame_len,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Run the accept loop until [`RelayServer::close`] is called.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        while let Some(incoming) = self.endpoint.accept().await {
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        if let Err(e) = server.handle_connection(conn).await {
                            warn!("Connection handler error: {e:#}");
                        }
                    }
                    Err(e) => warn!("Failed to accept connection: {e}"),
                }
            });
        }
        info!("Relay stopped accepting connections");
        Ok(())
    }

    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"relay shutting down");
    }

    // -----------------------------------------------------------------------
    // Connection handling
    // -----------------------------------------------------------------------

    async fn handle_connection(&self, connection: Connection) -> anyhow::Result<()> {
        let remote = connection.remote_address();
        info!(%remote, "New connection");

        // The client opens the signaling stream and speaks first.
        let (control_send, mut control_recv) = connection.accept_bi().await?;
        match self.read(&mut control_recv).await? {
            RelayFrame::Hello { client_version } => {
                debug!(%remote, %client_version, "Hello received");
            }
            other => anyhow::bail!("expected Hello, got {other:?}"),
        }

        let peer = self.register(connection, control_send).await?;
        let id = peer.id.clone();
        info!(%id, %remote, "Session registered");

        let result = match self
            .send(&peer, &RelayFrame::IdentityAssigned { id: id.clone() })
            .await
        {
            Ok(()) => self.route_loop(&peer, &mut control_recv).await,
            Err(e) => Err(e),
        };

        self.unregister(&id).await;
        result
    }

    async fn route_loop(
        &self,
        peer: &Arc<PeerConn>,
        control_recv: &mut RecvStream,
    ) -> anyhow::Result<()> {
        loop {
            let frame = match self.read(control_recv).await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(id = %peer.id, "Signaling stream ended: {e:#}");
                    break;
                }
            };

            match frame {
                RelayFrame::Route { to, signal } => self.forward(peer, to, signal).await,
                other => debug!(id = %peer.id, ?other, "Ignoring frame"),
            }
        }
        Ok(())
    }

    async fn forward(&self, sender: &PeerConn, to: SessionId, signal: Signal) {
        let target = self.sessions.read().await.get(&to).cloned();
        let kind = signal.kind();

        let delivered = match target {
            Some(target) => {
                let frame = RelayFrame::Deliver {
                    from: sender.id.clone(),
                    signal,
                };
                match self.send(&target, &frame).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(%to, "Failed to deliver {kind}: {e:#}");
                        false
                    }
                }
            }
            None => false,
        };

        if delivered {
            debug!(from = %sender.id, %to, kind, "Forwarded");
        } else {
            debug!(from = %sender.id, %to, kind, "Undeliverable");
            if let Err(e) = self.send(sender, &RelayFrame::Undeliverable { to }).await {
                warn!(id = %sender.id, "Failed to report undeliverable signal: {e:#}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Session management
    // -----------------------------------------------------------------------

    async fn register(
        &self,
        connection: Connection,
        control_send: SendStream,
    ) -> anyhow::Result<Arc<PeerConn>> {
        let mut sessions = self.sessions.write().await;
        let id = sessions.register(|id| {
            Arc::new(PeerConn {
                id,
                connection,
                control_send: Mutex::new(control_send),
            })
        });
        sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("session {id} vanished while registering"))
    }

    async fn unregister(&self, id: &SessionId) {
        let others: Vec<Arc<PeerConn>> = {
            let mut sessions = self.sessions.write().await;
            if let Some(peer) = sessions.remove(id) {
                peer.connection.close(0u32.into(), b"session closed");
            }
            if sessions.is_empty() {
                debug!("Last session gone, relay idle");
            }
            sessions.others(id).map(|(_, peer)| Arc::clone(peer)).collect()
        };

        let frame = RelayFrame::PeerDisconnected { id: id.clone() };
        for peer in others {
            if let Err(e) = self.send(&peer, &frame).await {
                warn!(id = %peer.id, "Failed to announce disconnect: {e:#}");
            }
        }
        info!(%id, "Session removed");
    }

    // -----------------------------------------------------------------------
    // Wire helpers
    // -----------------------------------------------------------------------

    async fn read(&self, recv: &mut RecvStream) -> anyhow::Result<RelayFrame> {
        read_frame(recv, &self.codec, self.max_frame_len).await
    }

    async fn send(&self, peer: &PeerConn, frame: &RelayFrame) -> anyhow::Result<()> {
        let mut send = peer.control_send.lock().await;
        write_frame(&mut *send, &self.codec, frame).await
    }

    // -----------------------------------------------------------------------
    // Self-signed TLS config (dev only)
    // -----------------------------------------------------------------------

    fn generate_self_signed_config(config: &RelayServerConfig) -> anyhow::Result<ServerConfig> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;
        let cert_der = cert.cert.der().to_vec();
        let key_der = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let server_crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![rustls::pki_types::CertificateDer::from(cert_der)],
                rustls::pki_types::PrivateKeyDer::Pkcs8(key_der),
            )?;

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_idle_timeout(Some(quinn::IdleTimeout::try_from(
            config.idle_timeout(),
        )?));

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)?,
        ));
        server_config.transport_config(Arc::new(transport_config));

        Ok(server_config)
    }
}
