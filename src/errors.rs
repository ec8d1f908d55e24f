//! Closed set of error kinds surfaced by the engine.
//!
//! Every I/O primitive and protocol layer reduces its failures to one of
//! these kinds. Transient conditions (`WouldBlock`, TLS want-read/write)
//! are retried internally and only terminal outcomes escape to callers.

use thiserror::Error;

/// Error kinds produced by the measurement engine.
///
/// The first group mirrors POSIX errno conditions, the `Ai*` group covers
/// name resolution, the `Ssl*` group covers TLS, and the tail covers
/// protocol-level policy violations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("broken pipe")]
    BrokenPipe,
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset")]
    ConnectionReset,
    #[error("function not supported")]
    FunctionNotSupported,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("interrupted")]
    Interrupted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("i/o error")]
    Io,
    #[error("message too large for buffer")]
    MessageSize,
    #[error("network down")]
    NetworkDown,
    #[error("network reset")]
    NetworkReset,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("operation in progress")]
    OperationInProgress,
    #[error("operation would block")]
    OperationWouldBlock,
    #[error("timed out")]
    TimedOut,
    #[error("value too large")]
    ValueTooLarge,
    #[error("unexpected end of stream")]
    Eof,
    #[error("name resolution failed")]
    AiGeneric,
    #[error("name resolution failed, try again")]
    AiAgain,
    #[error("name resolution failed permanently")]
    AiFail,
    #[error("hostname not found")]
    AiNoname,
    #[error("SOCKSv5 protocol error")]
    Socks5h,
    #[error("TLS error")]
    SslGeneric,
    #[error("TLS wants a read")]
    SslWantRead,
    #[error("TLS wants a write")]
    SslWantWrite,
    #[error("TLS syscall error")]
    SslSyscall,
    #[error("WebSocket protocol error")]
    WsProto,
}

impl ErrorKind {
    /// Normalize a `std::io::Error` into the closed kind set.
    ///
    /// Falls back to raw errno inspection for conditions `std::io` has no
    /// portable kind for, and to [`ErrorKind::Io`] as the catch-all.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match err.kind() {
            IoKind::BrokenPipe => ErrorKind::BrokenPipe,
            IoKind::ConnectionAborted => ErrorKind::ConnectionAborted,
            IoKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            IoKind::ConnectionReset => ErrorKind::ConnectionReset,
            IoKind::Interrupted => ErrorKind::Interrupted,
            IoKind::InvalidInput => ErrorKind::InvalidArgument,
            IoKind::TimedOut => ErrorKind::TimedOut,
            IoKind::UnexpectedEof => ErrorKind::Eof,
            IoKind::WouldBlock => ErrorKind::OperationWouldBlock,
            IoKind::Unsupported => ErrorKind::FunctionNotSupported,
            _ => match err.raw_os_error() {
                Some(libc::EHOSTUNREACH) => ErrorKind::HostUnreachable,
                Some(libc::ENETDOWN) => ErrorKind::NetworkDown,
                Some(libc::ENETRESET) => ErrorKind::NetworkReset,
                Some(libc::ENETUNREACH) => ErrorKind::NetworkUnreachable,
                Some(libc::EINPROGRESS) => ErrorKind::OperationInProgress,
                Some(libc::EOVERFLOW) => ErrorKind::ValueTooLarge,
                Some(libc::EPIPE) => ErrorKind::BrokenPipe,
                _ => ErrorKind::Io,
            },
        }
    }
}
