//! peercall-core: signaling for direct two-party audio/video calls.
//!
//! # Architecture (Clean Architecture)
//!
//! - **domain**: identifiers, signaling messages, call phases (no I/O).
//! - **application**: the call state machine, its event loop, and port traits
//!   for the relay, media capture, negotiation engine and UI.
//! - **adapters**: QUIC relay client + server (Quinn), in-process loopback
//!   relay, session registry.
//! - **endpoint**: composition root wiring adapters into a running call loop.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod endpoint;
