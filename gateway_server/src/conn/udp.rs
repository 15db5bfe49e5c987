//! UDP transports backing [`Connection`](super::Connection): a
//! `connect()`-bound peer, and a connectionless send-to/recv-from
//! variant for plugins that talk to a set of devices off one socket.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

#[derive(Debug, Error)]
pub enum UdpError {
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
}

/// A UDP socket `connect()`-ed to one peer; `send`/`recv` behave like
/// a connected-stream API even though the wire protocol is datagram.
pub struct UdpConnected {
    socket: UdpSocket,
}

impl UdpConnected {
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self, UdpError> {
        let socket = UdpSocket::bind(local).await.map_err(UdpError::Bind)?;
        socket.connect(peer).await.map_err(UdpError::Connect)?;
        Ok(UdpConnected { socket })
    }

    pub async fn send(&self, data: &[u8]) -> Result<(), UdpError> {
        self.socket.send(data).await.map_err(UdpError::Io)?;
        Ok(())
    }

    pub async fn recv(&self, out: &mut [u8]) -> Result<usize, UdpError> {
        self.socket.recv(out).await.map_err(UdpError::Io)
    }
}

/// A bare UDP socket addressing each datagram explicitly, for plugins
/// fanning out to several unconnected peers (e.g. broadcast discovery).
pub struct UdpSendTo {
    socket: UdpSocket,
}

impl UdpSendTo {
    pub async fn bind(local: SocketAddr) -> Result<Self, UdpError> {
        let socket = UdpSocket::bind(local).await.map_err(UdpError::Bind)?;
        Ok(UdpSendTo { socket })
    }

    pub async fn send_to(&self, data: &[u8], peer: SocketAddr) -> Result<(), UdpError> {
        self.socket.send_to(data, peer).await.map_err(UdpError::Io)?;
        Ok(())
    }

    pub async fn recv_from(&self, out: &mut [u8]) -> Result<(usize, SocketAddr), UdpError> {
        self.socket.recv_from(out).await.map_err(UdpError::Io)
    }
}
