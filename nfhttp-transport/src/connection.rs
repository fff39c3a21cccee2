use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// A connection's transport-level identity: a plain socket, or a socket
/// upgraded to TLS. This is a sum type rather than a second object wrapping
/// the same socket, so the socket always has exactly one owner — the design
/// note's replacement for a shared-pointer TLS stream aliasing the raw
/// socket.
pub enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection {
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        match self {
            Connection::Plain(s) => s.peer_addr(),
            Connection::Tls(s) => s.get_ref().0.peer_addr(),
        }
    }

    /// Tears the socket down immediately. Called by the pool before a
    /// connection is discarded (never recycled into the idle stack), so a
    /// peer-initiated close can never be mistaken for data belonging to the
    /// next request. External cancellation goes through a different path:
    /// the attempt future holding the connection is dropped outright, which
    /// closes the socket via `TcpStream`'s own `Drop`.
    pub async fn shutdown(&mut self) {
        let _ = match self {
            Connection::Plain(s) => tokio::io::AsyncWriteExt::shutdown(s).await,
            Connection::Tls(s) => tokio::io::AsyncWriteExt::shutdown(s.as_mut()).await,
        };
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_flush(cx),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connection together with the pool bookkeeping the spec requires:
/// reuse/keep-alive/close flags and the epoch it was released under.
pub struct PooledConnection {
    pub connection: Connection,
    pub is_reused: bool,
    pub keep_alive: bool,
    pub is_closed: bool,
    pub epoch: u64,
}

impl PooledConnection {
    pub fn fresh(connection: Connection) -> Self {
        Self { connection, is_reused: false, keep_alive: true, is_closed: false, epoch: 0 }
    }
}
