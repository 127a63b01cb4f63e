//! UDP relay transport
//!
//! The relay forwards each RS485 frame from the heat pump as one datagram and
//! writes whatever comes back onto the bus.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::{FrameTransport, TransportError};
use crate::protocol::constants::MAX_DATAGRAM_SIZE;

pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    buffer: Vec<u8>,
}

impl UdpTransport {
    pub async fn bind(host: &str, port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((host, port))
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}:{}: {}", host, port, e)))?;
        if let Ok(addr) = socket.local_addr() {
            info!("Listening for heat pump frames on udp://{}", addr);
        }
        Ok(Self {
            socket,
            peer: None,
            buffer: vec![0; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Source of the most recent datagram
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[async_trait]
impl FrameTransport for UdpTransport {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let (len, peer) = self
            .socket
            .recv_from(&mut self.buffer)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if self.peer != Some(peer) {
            debug!("Relay peer is now {}", peer);
        }
        self.peer = Some(peer);

        let frame = self.buffer[..len].to_vec();
        debug!("IN  {}", hex::encode(&frame));
        Ok(frame)
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let peer = self.peer.ok_or(TransportError::NoPeer)?;
        debug!("OUT {}", hex::encode(frame));
        self.socket
            .send_to(frame, peer)
            .await
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", peer, e)))?;
        Ok(())
    }
}
