//! TCP client and server transports backing [`Connection`](super::Connection).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::state::ConnState;

#[derive(Debug, Error)]
pub enum TcpError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("not connected")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
}

/// A single outbound TCP connection, reconnecting lazily on the next
/// send if the peer drops it. The client socket and its lifecycle
/// state share one mutex, same interior-mutability shape the OPC UA
/// plugin uses for its `Client`.
pub struct TcpClient {
    addr: SocketAddr,
    connect_timeout: Duration,
    inner: Mutex<TcpClientInner>,
}

struct TcpClientInner {
    stream: Option<TcpStream>,
    state: ConnState,
}

impl TcpClient {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        TcpClient {
            addr,
            connect_timeout,
            inner: Mutex::new(TcpClientInner {
                stream: None,
                state: ConnState::Idle,
            }),
        }
    }

    pub async fn state(&self) -> ConnState {
        self.inner.lock().await.state
    }

    async fn ensure_connected<'a>(
        &self,
        guard: &mut tokio::sync::MutexGuard<'a, TcpClientInner>,
    ) -> Result<(), TcpError> {
        if guard.stream.is_some() {
            return Ok(());
        }
        guard.state = ConnState::Connecting;
        let connect = TcpStream::connect(self.addr);
        let result = tokio::time::timeout(self.connect_timeout, connect).await;
        match result {
            Ok(Ok(stream)) => {
                debug!(addr = %self.addr, "tcp client connected");
                guard.stream = Some(stream);
                guard.state = ConnState::Connected;
                Ok(())
            }
            Ok(Err(e)) => {
                guard.state = ConnState::Idle;
                Err(TcpError::Connect(e))
            }
            Err(_) => {
                guard.state = ConnState::Idle;
                Err(TcpError::Connect(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                )))
            }
        }
    }

    /// Sends `data`, transparently reconnecting if the socket had been
    /// dropped (either never connected, or lost on a prior send/recv).
    pub async fn send(&self, data: &[u8]) -> Result<(), TcpError> {
        let mut guard = self.inner.lock().await;
        self.ensure_connected(&mut guard).await?;
        let stream = guard.stream.as_mut().expect("connected above");
        if let Err(e) = stream.write_all(data).await {
            guard.stream = None;
            guard.state = ConnState::Idle;
            return Err(TcpError::Io(e));
        }
        Ok(())
    }

    /// Reads whatever is available into `out`, returning the number of
    /// bytes read. `0` means the peer closed the connection; the
    /// client tears itself down so the next `send`/`recv` reconnects.
    pub async fn recv(&self, out: &mut [u8]) -> Result<usize, TcpError> {
        let mut guard = self.inner.lock().await;
        self.ensure_connected(&mut guard).await?;
        let stream = guard.stream.as_mut().expect("connected above");
        match stream.read(out).await {
            Ok(0) => {
                guard.stream = None;
                guard.state = ConnState::Idle;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                guard.stream = None;
                guard.state = ConnState::Idle;
                Err(TcpError::Io(e))
            }
        }
    }

    pub async fn disconnect(&self) {
        let mut guard = self.inner.lock().await;
        guard.state = ConnState::Disconnecting;
        guard.stream = None;
        guard.state = ConnState::Idle;
    }
}

/// One accepted TCP server peer.
pub struct ClientSlot {
    pub addr: SocketAddr,
    pub stream: TcpStream,
}

/// TCP server side of a [`Connection`](super::Connection). Keeps a
/// bounded table of connected peers; a new connection beyond `max_link`
/// evicts the least-recently-used slot rather than being refused.
pub struct TcpServer {
    listener: TcpListener,
    max_link: usize,
    clients: Mutex<VecDeque<ClientSlot>>,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr, max_link: usize) -> Result<Self, TcpError> {
        let listener = TcpListener::bind(addr).await.map_err(TcpError::Connect)?;
        Ok(TcpServer {
            listener,
            max_link,
            clients: Mutex::new(VecDeque::with_capacity(max_link)),
        })
    }

    /// Accepts one connection, inserting it into the client table and
    /// evicting the oldest slot if the table is already at `max_link`.
    /// Returns the address of any evicted peer for logging.
    pub async fn accept_one(&self) -> Result<Option<SocketAddr>, TcpError> {
        let (stream, addr) = self.listener.accept().await.map_err(TcpError::Io)?;
        let mut clients = self.clients.lock().await;
        let evicted = if clients.len() >= self.max_link {
            clients.pop_front().map(|s| s.addr)
        } else {
            None
        };
        if let Some(ev) = evicted {
            warn!(evicted = %ev, new = %addr, "tcp server max_link reached, evicting LRU peer");
        }
        clients.push_back(ClientSlot { addr, stream });
        Ok(evicted)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}
