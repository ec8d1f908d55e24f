//! SOCKSv5h CONNECT prelude (RFC 1928, no-auth only).
//!
//! Hostname resolution is delegated to the proxy: the CONNECT request
//! always carries `ATYPE=domainname`, never a resolved address.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::net::{read_exact_timeout, write_all_timeout};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYPE_IPV4: u8 = 0x01;
const ATYPE_DOMAIN: u8 = 0x03;
const ATYPE_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;

/// Build the CONNECT request for `host:port` with a domain-name ATYPE.
pub fn encode_connect_request(host: &str, port: u16) -> Result<Vec<u8>, ErrorKind> {
    if host.is_empty() || host.len() > 255 {
        return Err(ErrorKind::InvalidArgument);
    }
    let mut req = Vec::with_capacity(7 + host.len());
    req.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYPE_DOMAIN, host.len() as u8]);
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    Ok(req)
}

/// Perform the SOCKSv5h handshake on a freshly connected proxy stream.
///
/// On success the stream is a tunnel to `host:port` and the caller may
/// proceed with TLS or the application protocol.
pub async fn handshake(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    timeout: Duration,
    emit: &Emitter,
) -> Result<(), ErrorKind> {
    write_all_timeout(stream, &[VERSION, 0x01, METHOD_NO_AUTH], timeout).await?;

    let mut method = [0u8; 2];
    read_exact_timeout(stream, &mut method, timeout).await?;
    if method != [VERSION, METHOD_NO_AUTH] {
        emit.warning("socks5h: proxy did not accept the no-auth method");
        return Err(ErrorKind::Socks5h);
    }

    let request = encode_connect_request(host, port)?;
    write_all_timeout(stream, &request, timeout).await?;

    let mut reply = [0u8; 4];
    read_exact_timeout(stream, &mut reply, timeout).await?;
    if reply[0] != VERSION || reply[1] != REPLY_SUCCEEDED || reply[2] != 0x00 {
        emit.warning(&format!(
            "socks5h: connect rejected (version {} reply {} reserved {})",
            reply[0], reply[1], reply[2]
        ));
        return Err(ErrorKind::Socks5h);
    }

    // Drain the bound address and port; we have no use for them.
    let addr_len = match reply[3] {
        ATYPE_IPV4 => 4usize,
        ATYPE_IPV6 => 16usize,
        ATYPE_DOMAIN => {
            let mut len = [0u8; 1];
            read_exact_timeout(stream, &mut len, timeout).await?;
            len[0] as usize
        }
        _ => {
            emit.warning("socks5h: invalid address type in reply");
            return Err(ErrorKind::Socks5h);
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    read_exact_timeout(stream, &mut bound, timeout).await?;

    emit.debug(&format!("socks5h: tunnel to {host}:{port} established"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_layout() {
        let req = encode_connect_request("example.test", 443).unwrap();
        assert_eq!(&req[..5], &[0x05, 0x01, 0x00, 0x03, 12]);
        assert_eq!(&req[5..17], b"example.test");
        assert_eq!(&req[17..], &[0x01, 0xBB]);
    }

    #[test]
    fn hostname_over_255_bytes_rejected() {
        let long = "a".repeat(256);
        assert_eq!(
            encode_connect_request(&long, 80),
            Err(ErrorKind::InvalidArgument)
        );
    }

    #[test]
    fn empty_hostname_rejected() {
        assert_eq!(encode_connect_request("", 80), Err(ErrorKind::InvalidArgument));
    }

    #[test]
    fn port_is_network_byte_order() {
        let req = encode_connect_request("x", 0x1234).unwrap();
        assert_eq!(&req[req.len() - 2..], &[0x12, 0x34]);
    }
}
