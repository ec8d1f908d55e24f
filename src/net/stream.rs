//! Byte stream over plain TCP or TLS.
//!
//! `NdtStream` ties the TLS session to the TCP socket by ownership: when
//! the stream drops, both are released exactly once. The raw file
//! descriptor is captured at connect time so kernel TCP statistics stay
//! reachable after the TLS wrap.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pub enum NdtStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl NdtStream {
    /// Raw fd of the underlying TCP socket (for `TCP_INFO` snapshots).
    #[cfg(unix)]
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        match self {
            NdtStream::Plain(s) => s.as_raw_fd(),
            NdtStream::Tls(s) => s.get_ref().0.as_raw_fd(),
        }
    }
}

impl AsyncRead for NdtStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NdtStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            NdtStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NdtStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NdtStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            NdtStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NdtStream::Plain(s) => Pin::new(s).poll_flush(cx),
            NdtStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NdtStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            NdtStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
