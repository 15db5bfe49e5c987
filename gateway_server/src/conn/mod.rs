//! C1 — framed connections. A `Connection` owns exactly one transport
//! (TCP client, TCP server, connected or connectionless UDP, serial)
//! plus the rolling receive buffer and state machine shared across all
//! of them. Plugins drive it with a [`FrameConsumer`] or
//! [`WaitMsgConsumer`] rather than parsing raw reads themselves.

pub mod buffer;
pub mod serial;
pub mod state;
pub mod tcp;
pub mod udp;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub use buffer::{BufferError, ConsumeOutcome, FrameConsumer, RollingBuffer, WaitMsgConsumer, WaitMsgOutcome};
pub use serial::{Serial, SerialError, SerialParams, SerialParity};
pub use state::ConnState;
pub use tcp::{ClientSlot, TcpClient, TcpError, TcpServer};
pub use udp::{UdpConnected, UdpError, UdpSendTo};

/// Number of retries on a transient EAGAIN/WouldBlock style short read
/// before giving up on a send.
pub const EAGAIN_RETRIES: u32 = 10;
pub const EAGAIN_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Tcp(#[from] TcpError),
    #[error(transparent)]
    Udp(#[from] UdpError),
    #[error(transparent)]
    Serial(#[from] SerialError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("invalid ip address: {0}")]
    InvalidAddr(String),
    #[error("connection was torn down mid-send after {0} retries")]
    RetriesExhausted(u32),
}

/// Parameters describing how to reach a device, one variant per
/// `Connection` transport. Serialized as part of a driver's
/// configuration.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionParam {
    TcpClient { host: String, port: u16 },
    TcpServer { bind: String, port: u16, max_link: usize },
    UdpConnected { local: String, peer: String },
    UdpSendTo { local: String },
    Serial {
        device: String,
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: String,
    },
}

/// Validates an IPv4/IPv6 literal, rejecting hostnames — DNS
/// resolution belongs to the caller, not the connection layer.
pub fn validate_ip(host: &str) -> Result<IpAddr, ConnError> {
    host.parse::<IpAddr>()
        .map_err(|_| ConnError::InvalidAddr(host.to_string()))
}

/// The transport half of a connection, chosen by `ConnectionParam`.
pub enum Transport {
    TcpClient(TcpClient),
    TcpServer(TcpServer),
    UdpConnected(UdpConnected),
    UdpSendTo(UdpSendTo),
    Serial(Serial),
}

/// One framed connection: a transport plus the rolling buffer every
/// stream-mode transport drains into.
pub struct Connection {
    pub transport: Transport,
    buffer: RollingBuffer,
}

impl Connection {
    pub async fn open(param: &ConnectionParam) -> Result<Self, ConnError> {
        let transport = match param {
            ConnectionParam::TcpClient { host, port } => {
                let ip = validate_ip(host)?;
                let client = TcpClient::new(SocketAddr::new(ip, *port), Duration::from_secs(5));
                Transport::TcpClient(client)
            }
            ConnectionParam::TcpServer { bind, port, max_link } => {
                let ip = validate_ip(bind)?;
                let server = TcpServer::bind(SocketAddr::new(ip, *port), *max_link).await?;
                Transport::TcpServer(server)
            }
            ConnectionParam::UdpConnected { local, peer } => {
                let local_addr: SocketAddr = local
                    .parse()
                    .map_err(|_| ConnError::InvalidAddr(local.clone()))?;
                let peer_addr: SocketAddr = peer
                    .parse()
                    .map_err(|_| ConnError::InvalidAddr(peer.clone()))?;
                Transport::UdpConnected(UdpConnected::connect(local_addr, peer_addr).await?)
            }
            ConnectionParam::UdpSendTo { local } => {
                let local_addr: SocketAddr = local
                    .parse()
                    .map_err(|_| ConnError::InvalidAddr(local.clone()))?;
                Transport::UdpSendTo(UdpSendTo::bind(local_addr).await?)
            }
            ConnectionParam::Serial {
                device,
                baud_rate,
                data_bits,
                stop_bits,
                parity,
            } => {
                let parity = match parity.to_ascii_lowercase().as_str() {
                    "odd" => SerialParity::Odd,
                    "even" => SerialParity::Even,
                    _ => SerialParity::None,
                };
                let params = SerialParams {
                    device: device.clone(),
                    baud_rate: *baud_rate,
                    data_bits: *data_bits,
                    stop_bits: *stop_bits,
                    parity,
                    read_timeout: Duration::from_millis(100),
                };
                Transport::Serial(Serial::open(&params)?)
            }
        };

        Ok(Connection {
            transport,
            buffer: RollingBuffer::new(),
        })
    }

    /// Sends `data`, retrying on a transient short-write up to
    /// [`EAGAIN_RETRIES`] times with [`EAGAIN_RETRY_DELAY`] between
    /// attempts before giving up.
    pub async fn send(&self, data: &[u8]) -> Result<(), ConnError> {
        let mut attempt = 0;
        loop {
            let result = match &self.transport {
                Transport::TcpClient(c) => c.send(data).await.map_err(ConnError::from),
                Transport::UdpConnected(c) => c.send(data).await.map_err(ConnError::from),
                Transport::Serial(_) | Transport::TcpServer(_) | Transport::UdpSendTo(_) => {
                    return Err(ConnError::InvalidAddr(
                        "send() requires a point-to-point transport".into(),
                    ))
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < EAGAIN_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "transient send failure, retrying");
                    tokio::time::sleep(EAGAIN_RETRY_DELAY).await;
                    let _ = e;
                }
                Err(_) => return Err(ConnError::RetriesExhausted(attempt)),
            }
        }
    }

    /// Reads one chunk from the transport into the rolling buffer and
    /// drives `consumer` over whatever is now buffered.
    pub async fn recv_and_consume<C: FrameConsumer>(
        &mut self,
        consumer: &mut C,
    ) -> Result<(), ConnError> {
        let mut chunk = [0u8; 4096];
        let n = match &mut self.transport {
            Transport::TcpClient(c) => c.recv(&mut chunk).await?,
            Transport::UdpConnected(c) => c.recv(&mut chunk).await?,
            Transport::Serial(s) => s.read(&mut chunk).await?,
            Transport::TcpServer(_) | Transport::UdpSendTo(_) => {
                return Err(ConnError::InvalidAddr(
                    "recv_and_consume requires a point-to-point transport".into(),
                ))
            }
        };
        if n > 0 {
            self.buffer.extend(&chunk[..n])?;
            self.buffer
                .drive_stream(consumer)
                .map_err(|_| ConnError::RetriesExhausted(0))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_ip_accepts_v4_and_v6() {
        assert!(validate_ip("127.0.0.1").is_ok());
        assert!(validate_ip("::1").is_ok());
        assert!(validate_ip("not-an-ip").is_err());
    }

    #[tokio::test]
    async fn tcp_client_connection_opens_and_sends() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let conn = Connection::open(&ConnectionParam::TcpClient {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
        .await
        .unwrap();
        conn.send(b"ping").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"ping");
    }
}
