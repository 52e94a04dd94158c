//! WhatsApp Web transport for rukun.
//!
//! The WhatsApp Web client runs in a Node.js sidecar process; this crate
//! talks to it over a local WebSocket and exposes it as a
//! [`ChannelTransport`](rukun_channels::ChannelTransport).

pub mod credentials;
pub mod process;
pub mod sidecar;
pub mod transport;
pub mod types;

pub use {
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarClient},
    transport::{WhatsAppTransport, WhatsAppTransportConfig},
    types::{GatewayRequest, SidecarEvent, chat_id},
};
