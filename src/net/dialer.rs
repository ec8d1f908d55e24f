//! Connection establishment: name resolution, TCP dial, and the layered
//! SOCKSv5h → TLS → WebSocket upgrade stack.
//!
//! Each layer is a no-op unless enabled, and the layers always compose in
//! the same order so a WebSocket upgrade runs over whatever transport the
//! lower layers produced.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::net::{socks5, tls, Channel, NdtStream};
use crate::settings::Settings;
use crate::ws;

/// WebSocket layer parameters for [`dial_channel`].
#[derive(Debug, Clone, Copy)]
pub struct WsOpts<'a> {
    pub enabled: bool,
    pub protocol: &'a str,
    pub path: &'a str,
}

impl WsOpts<'_> {
    pub const DISABLED: WsOpts<'static> = WsOpts {
        enabled: false,
        protocol: "",
        path: "",
    };
}

/// Resolve `host` to socket addresses, trying the numeric form first and
/// falling back to DNS.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ErrorKind> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| ErrorKind::AiNoname)?
        .collect();
    if addrs.is_empty() {
        return Err(ErrorKind::AiNoname);
    }
    Ok(addrs)
}

async fn connect_addr(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, ErrorKind> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ErrorKind::from_io(&e)),
        Err(_) => Err(ErrorKind::TimedOut),
    }
}

/// Establish the TCP leg to `host:port`, through the SOCKSv5h proxy when
/// one is configured (in which case resolution happens at the proxy).
pub async fn dial_tcp(
    settings: &Settings,
    emit: &Emitter,
    host: &str,
    port: u16,
) -> Result<TcpStream, ErrorKind> {
    if let Some(proxy_port) = settings.socks5h_port {
        let proxy = SocketAddr::from(([127, 0, 0, 1], proxy_port));
        emit.debug(&format!("dialing {host}:{port} via socks5h proxy on {proxy}"));
        let mut stream = connect_addr(proxy, settings.timeout).await?;
        socks5::handshake(&mut stream, host, port, settings.timeout, emit).await?;
        return Ok(stream);
    }

    let addrs = resolve(host, port).await?;
    let mut last_err = ErrorKind::HostUnreachable;
    for addr in addrs {
        match connect_addr(addr, settings.timeout).await {
            Ok(stream) => {
                emit.debug(&format!("connected to {addr}"));
                return Ok(stream);
            }
            Err(kind) => {
                emit.warning(&format!("connect to {addr} failed: {kind}"));
                last_err = kind;
            }
        }
    }
    Err(last_err)
}

/// TCP (maybe through SOCKSv5h), then TLS when `use_tls` is set.
pub async fn dial_stream(
    settings: &Settings,
    emit: &Emitter,
    host: &str,
    port: u16,
    use_tls: bool,
) -> Result<NdtStream, ErrorKind> {
    let tcp = dial_tcp(settings, emit, host, port).await?;
    if !use_tls {
        return Ok(NdtStream::Plain(tcp));
    }
    let config = Arc::new(tls::build_client_config(settings, emit)?);
    let stream = tls::handshake(config, host, tcp, settings.timeout, emit).await?;
    Ok(NdtStream::Tls(Box::new(stream)))
}

/// Full dialer stack: TCP → SOCKSv5h → TLS → WebSocket, each layer applied
/// only when enabled.
pub async fn dial_channel(
    settings: &Settings,
    emit: &Emitter,
    host: &str,
    port: u16,
    use_tls: bool,
    ws_opts: WsOpts<'_>,
) -> Result<Channel, ErrorKind> {
    let mut stream = dial_stream(settings, emit, host, port, use_tls).await?;
    if !ws_opts.enabled {
        return Ok(Channel::Raw(stream));
    }
    ws::handshake::upgrade(
        &mut stream,
        host,
        port,
        ws_opts.protocol,
        ws_opts.path,
        settings.timeout,
        emit,
    )
    .await?;
    Ok(Channel::Ws(ws::WsConn::new(stream, settings.timeout)))
}
