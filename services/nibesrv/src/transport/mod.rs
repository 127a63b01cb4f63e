//! Transport Layer
//!
//! Byte conduits around the poll-response core:
//! - [`udp`]: frames to and from the heat pump's RS485-to-UDP relay
//! - [`mqtt`]: requests in and decoded values out over MQTT

pub mod mqtt;
pub mod udp;

use async_trait::async_trait;
use thiserror::Error;

pub use mqtt::MqttBridge;
pub use udp::UdpTransport;

/// Transport layer error types
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Nothing has been received yet, so there is nobody to reply to
    #[error("No peer to reply to")]
    NoPeer,
}

/// Request/reply frame conduit to the heat pump
#[async_trait]
pub trait FrameTransport: Send {
    /// Wait for the next inbound frame
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Reply to the sender of the most recent frame
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}
