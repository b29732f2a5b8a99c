//! Byte stream of one proxy connection.

use pin_project_lite::pin_project;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    /// Connection to a proxy port, split into read and write halves once the
    /// session starts.
    #[project = ProxyStreamProj]
    pub enum ProxyStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl ProxyStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, ProxyStream::Tls { .. })
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            ProxyStream::Plain { stream } => stream,
            ProxyStream::Tls { stream } => stream.get_ref().0,
        }
    }

    /// Address of the proxy end.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Transport label for log lines.
    pub fn transport(&self) -> &'static str {
        if self.is_tls() {
            "tls"
        } else {
            "tcp"
        }
    }
}

// Both variants forward to the wrapped stream.
macro_rules! forward {
    ($this:expr, $stream:ident => $call:expr) => {
        match $this.project() {
            ProxyStreamProj::Plain { stream: $stream } => $call,
            ProxyStreamProj::Tls { stream: $stream } => $call,
        }
    };
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        forward!(self, s => s.poll_read(cx, buf))
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        forward!(self, s => s.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        forward!(self, s => s.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        forward!(self, s => s.poll_shutdown(cx))
    }
}
