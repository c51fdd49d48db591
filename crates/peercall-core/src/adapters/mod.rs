pub mod loopback;
pub mod quic;
pub mod registry;
