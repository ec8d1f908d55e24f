//! WebSocket client upgrade (RFC 6455 opening handshake).
//!
//! A fresh random `Sec-WebSocket-Key` is generated per connection and the
//! expected `Sec-WebSocket-Accept` is derived from it, so the handshake
//! never depends on a fixed nonce.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::net::{write_all_timeout, NdtStream};

/// Fixed GUID appended to the key when computing the accept digest.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on a single response line.
const MAX_LINE_LEN: usize = 8000;
/// Upper bound on the number of response headers.
const MAX_HEADERS: usize = 1000;

// Required response headers, tracked as a bitmask.
const HAS_UPGRADE: u8 = 1 << 0;
const HAS_CONNECTION: u8 = 1 << 1;
const HAS_ACCEPT: u8 = 1 << 2;
const HAS_PROTOCOL: u8 = 1 << 3;
const HAS_ALL: u8 = HAS_UPGRADE | HAS_CONNECTION | HAS_ACCEPT | HAS_PROTOCOL;

/// Fresh random 16-byte key, base64 encoded.
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// The `Sec-WebSocket-Accept` value the server must echo for `key`.
pub fn accept_for_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Classify one response header against the required set. Returns the
/// flag bit the header satisfies, or 0.
fn header_flag(name: &str, value: &str, expected_accept: &str, protocol: &str) -> u8 {
    let value = value.trim();
    if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
        HAS_UPGRADE
    } else if name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("upgrade") {
        HAS_CONNECTION
    } else if name.eq_ignore_ascii_case("sec-websocket-accept") && value == expected_accept {
        HAS_ACCEPT
    } else if name.eq_ignore_ascii_case("sec-websocket-protocol") && value == protocol {
        HAS_PROTOCOL
    } else {
        0
    }
}

/// Read one CRLF-terminated line, one byte at a time (the response is
/// tiny and this never over-reads past the header section).
async fn read_line<S: AsyncRead + Unpin>(
    stream: &mut S,
    timeout: std::time::Duration,
) -> Result<String, ErrorKind> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(timeout, stream.read_exact(&mut byte)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ErrorKind::from_io(&e)),
            Err(_) => return Err(ErrorKind::TimedOut),
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_LINE_LEN {
            return Err(ErrorKind::WsProto);
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| ErrorKind::WsProto)
}

/// Perform the client upgrade on an established stream. On return the
/// stream speaks WebSocket framing with the negotiated subprotocol.
pub async fn upgrade(
    stream: &mut NdtStream,
    host: &str,
    port: u16,
    protocol: &str,
    path: &str,
    timeout: std::time::Duration,
    emit: &Emitter,
) -> Result<(), ErrorKind> {
    let key = generate_key();
    let expected_accept = accept_for_key(&key);

    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Protocol: {protocol}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    write_all_timeout(stream, request.as_bytes(), timeout).await?;
    emit.debug(&format!("sent websocket upgrade request for {path}"));

    let status = read_line(stream, timeout).await?;
    if status != "HTTP/1.1 101 Switching Protocols" {
        emit.warning(&format!("websocket upgrade refused: {status}"));
        return Err(ErrorKind::WsProto);
    }

    let mut seen = 0u8;
    for _ in 0..MAX_HEADERS {
        let line = read_line(stream, timeout).await?;
        if line.is_empty() {
            if seen != HAS_ALL {
                emit.warning("websocket upgrade response is missing required headers");
                return Err(ErrorKind::WsProto);
            }
            emit.debug(&format!("websocket channel ready (subprotocol {protocol})"));
            return Ok(());
        }
        if let Some((name, value)) = line.split_once(':') {
            seen |= header_flag(name.trim(), value, &expected_accept, protocol);
        }
    }
    emit.warning("websocket upgrade response has too many headers");
    Err(ErrorKind::WsProto)
}
