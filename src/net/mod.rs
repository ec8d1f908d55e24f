//! Transport layers: TCP dialing, SOCKSv5h tunnelling, TLS, and the
//! stream/channel types shared by the protocol drivers.

pub mod dialer;
pub mod socks5;
pub mod stream;
pub mod tls;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use dialer::{dial_channel, dial_stream, dial_tcp, WsOpts};
pub use stream::NdtStream;

use crate::errors::ErrorKind;
use crate::ws::WsConn;

/// A connected control or measurement channel: either a raw byte stream
/// or a WebSocket connection over one.
pub enum Channel {
    Raw(NdtStream),
    Ws(WsConn),
}

/// `read_exact` bounded by the per-operation I/O timeout. A clean EOF
/// surfaces as [`ErrorKind::Eof`].
pub async fn read_exact_timeout<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), ErrorKind> {
    match tokio::time::timeout(timeout, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(ErrorKind::from_io(&e)),
        Err(_) => Err(ErrorKind::TimedOut),
    }
}

/// `write_all` bounded by the per-operation I/O timeout.
pub async fn write_all_timeout<S: AsyncWrite + Unpin>(
    stream: &mut S,
    buf: &[u8],
    timeout: Duration,
) -> Result<(), ErrorKind> {
    match tokio::time::timeout(timeout, stream.write_all(buf)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ErrorKind::from_io(&e)),
        Err(_) => Err(ErrorKind::TimedOut),
    }
}
