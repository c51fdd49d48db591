//! Quinn-based QUIC client [`SignalRelay`] adapter.
//!
//! Wraps a single QUIC connection to the relay with one bidirectional stream
//! carrying length-prefixed CBOR frames.

use std::sync::Arc;

use async_trait::async_trait;
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, TransportConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::application::ports::{RelayEvent, SignalRelay};
use crate::config::EndpointConfig;
use crate::domain::identity::SessionId;
use crate::domain::signal::{RelayFrame, Signal};

use super::codec::{read_frame, write_frame, CborFrameCodec};

// ---------------------------------------------------------------------------
// QuicRelayClient
// ---------------------------------------------------------------------------

/// Client-side [`SignalRelay`] backed by Quinn.
pub struct QuicRelayClient {
    _endpoint: Endpoint,
    connection: Connection,
    control_send: Mutex<SendStream>,
    control_recv: Mutex<RecvStream>,
    codec: CborFrameCodec,
    max_frame_len: usize,
}

impl QuicRelayClient {
    /// Connect to the relay and open the signaling stream.
    pub async fn connect(config: &EndpointConfig) -> anyhow::Result<Arc<Self>> {
        // Build client endpoint (0.0.0.0:0 for ephemeral port)
        let mut endpoint = Endpoint::client("0.0.0.0:0".parse()?)?;

        // The relay serves a self-signed certificate; accept any (dev only).
        let crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth();

        let mut transport = TransportConfig::default();
        transport.keep_alive_interval(Some(config.keep_alive()));

        let mut client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)?,
        ));
        client_config.transport_config(Arc::new(transport));
        endpoint.set_default_client_config(client_config);

        let relay_addr = config.relay_addr;
        info!(%relay_addr, "Connecting to relay");
        let connection = endpoint.connect(relay_addr, &config.server_name)?.await?;
        info!("Relay connection established");

        // The stream only becomes visible to the relay once we write to it.
        let (mut send, recv) = connection.open_bi().await?;
        write_frame(
            &mut send,
            &CborFrameCodec,
            &RelayFrame::Hello {
                client_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        )
        .await?;
        info!("Signaling stream opened");

        Ok(Arc::new(Self {
            _endpoint: endpoint,
            connection,
            control_send: Mutex::new(send),
            control_recv: Mutex::new(recv),
            codec: CborFrameCodec,
            max_frame_len: config.max_frame_len,
        }))
    }
}

#[async_trait]
impl SignalRelay for QuicRelayClient {
    async fn send_signal(&self, to: &SessionId, signal: Signal) -> anyhow::Result<()> {
        let frame = RelayFrame::Route {
            to: to.clone(),
            signal,
        };
        let mut send = self.control_send.lock().await;
        write_frame(&mut *send, &self.codec, &frame).await
    }

    async fn next_event(&self) -> anyhow::Result<RelayEvent> {
        let mut recv = self.control_recv.lock().await;
        loop {
            let frame = read_frame(&mut *recv, &self.codec, self.max_frame_len).await?;
            let event = match frame {
                RelayFrame::IdentityAssigned { id } => RelayEvent::IdentityAssigned(id),
                RelayFrame::Deliver { from, signal } => RelayEvent::Signal { from, signal },
                RelayFrame::PeerDisconnected { id } => RelayEvent::PeerDisconnected(id),
                RelayFrame::Undeliverable { to } => RelayEvent::Undeliverable(to),
                other => {
                    debug!(?other, "Ignoring frame not meant for endpoints");
                    continue;
                }
            };
            return Ok(event);
        }
    }

    fn close(&self) {
        self.connection.close(0u32.into(), b"bye");
    }
}

// ---------------------------------------------------------------------------
// Dev-only certificate verifier (skip verification)
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
