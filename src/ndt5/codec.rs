//! ndt5 message codec: 3-byte header (type + big-endian length), an
//! optional `{"msg": ...}` JSON envelope, and optional WebSocket
//! encapsulation of both.

use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::net::{read_exact_timeout, write_all_timeout, Channel};
use crate::settings::{NettestFlags, NDT_VERSION_COMPAT};
use crate::ws::frame::{FIN_FLAG, OP_BINARY, OP_CONTINUE};

/// ndt5 wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    CommFailure = 0,
    SrvQueue = 1,
    Login = 2,
    TestPrepare = 3,
    TestStart = 4,
    TestMsg = 5,
    TestFinalize = 6,
    Error = 7,
    Results = 8,
    Logout = 9,
    Waiting = 10,
    ExtendedLogin = 11,
}

impl MsgType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Header size: one type byte plus a u16 length.
pub const HEADER_LEN: usize = 3;

/// Largest control-message body: the header length field is a u16.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Receive buffer covering any legal message.
const RECV_BUF_LEN: usize = HEADER_LEN + MAX_BODY_LEN;

/// Build the wire form of a message: 3-byte header followed by the body.
/// Bodies longer than a u16 can describe are rejected before any byte is
/// sent.
pub fn encode(code: u8, body: &[u8]) -> Result<Vec<u8>, ErrorKind> {
    if body.len() > MAX_BODY_LEN {
        return Err(ErrorKind::MessageSize);
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(code);
    buf.put_u16(body.len() as u16);
    buf.put_slice(body);
    Ok(buf.to_vec())
}

/// Split a buffered wire message into `(type, body)`. Inverse of
/// [`encode`] for test and reassembly use.
pub fn decode(raw: &[u8]) -> Result<(u8, &[u8]), ErrorKind> {
    if raw.len() < HEADER_LEN {
        return Err(ErrorKind::MessageSize);
    }
    let declared = u16::from_be_bytes([raw[1], raw[2]]) as usize;
    if raw.len() != HEADER_LEN + declared {
        return Err(ErrorKind::MessageSize);
    }
    Ok((raw[0], &raw[HEADER_LEN..]))
}

/// Render a message body for debug logs, hex-escaping anything that is
/// not printable ASCII.
pub fn represent(body: &[u8]) -> String {
    if body.iter().all(|&b| (b' '..=b'~').contains(&b)) {
        return String::from_utf8_lossy(body).into_owned();
    }
    let mut out = String::from("binary([");
    for &b in body {
        if (b' '..=b'~').contains(&b) && b != b' ' {
            out.push(b as char);
        } else {
            out.push_str(&format!(" <0x{b:02x}> "));
        }
    }
    out.push_str("])");
    out
}

/// The ndt5 control (or measurement) channel with its codec state.
pub struct ControlChannel {
    chan: Channel,
    json: bool,
    timeout: Duration,
    emit: Emitter,
}

impl ControlChannel {
    pub fn new(chan: Channel, json: bool, timeout: Duration, emit: Emitter) -> Self {
        Self {
            chan,
            json,
            timeout,
            emit,
        }
    }

    /// Write a message without the JSON envelope.
    ///
    /// Over WebSocket the header goes out as one binary frame (FIN only
    /// when the body is empty) and the body as a FIN-flagged continuation
    /// frame; over a raw stream the header and body are two contiguous
    /// writes.
    pub async fn msg_write_legacy(&mut self, code: u8, body: &[u8]) -> Result<(), ErrorKind> {
        if body.len() > MAX_BODY_LEN {
            self.emit.warning("outgoing message body exceeds the u16 length field");
            return Err(ErrorKind::MessageSize);
        }
        self.emit
            .debug(&format!("sending message type {} body {}", code, represent(body)));
        let mut header = [0u8; HEADER_LEN];
        header[0] = code;
        header[1..3].copy_from_slice(&(body.len() as u16).to_be_bytes());
        match &mut self.chan {
            Channel::Raw(stream) => {
                write_all_timeout(stream, &header, self.timeout).await?;
                write_all_timeout(stream, body, self.timeout).await?;
            }
            Channel::Ws(conn) => {
                let first = if body.is_empty() {
                    FIN_FLAG | OP_BINARY
                } else {
                    OP_BINARY
                };
                conn.send_frame(first, &header).await?;
                if !body.is_empty() {
                    conn.send_frame(FIN_FLAG | OP_CONTINUE, body).await?;
                }
            }
        }
        Ok(())
    }

    /// Write a message, applying the JSON envelope when enabled.
    pub async fn msg_write(&mut self, code: MsgType, body: &str) -> Result<(), ErrorKind> {
        if self.json {
            let wrapped = serde_json::json!({ "msg": body }).to_string();
            self.msg_write_legacy(code.as_u8(), wrapped.as_bytes()).await
        } else {
            self.msg_write_legacy(code.as_u8(), body.as_bytes()).await
        }
    }

    /// Write the login message. Returns the effective subtest flags: the
    /// status and meta bits are always set, and subtests this client does
    /// not implement are stripped with a warning.
    pub async fn msg_write_login(
        &mut self,
        flags: NettestFlags,
    ) -> Result<NettestFlags, ErrorKind> {
        let mut flags = flags;
        flags.insert(NettestFlags::STATUS);
        flags.insert(NettestFlags::META);
        for (bit, name) in [
            (NettestFlags::MIDDLEBOX, "middlebox"),
            (NettestFlags::SIMPLE_FIREWALL, "simple-firewall"),
            (NettestFlags::UPLOAD_EXT, "upload-ext"),
        ] {
            if flags.contains(bit) {
                self.emit
                    .warning(&format!("{name} subtest is not implemented; dropping it"));
                flags.remove(bit);
            }
        }
        if self.json {
            let body = serde_json::json!({
                "msg": NDT_VERSION_COMPAT,
                "tests": flags.bits().to_string(),
            })
            .to_string();
            self.msg_write_legacy(MsgType::ExtendedLogin.as_u8(), body.as_bytes())
                .await?;
        } else {
            self.msg_write_legacy(MsgType::Login.as_u8(), &[flags.bits()])
                .await?;
        }
        Ok(flags)
    }

    /// Read one message without interpreting the JSON envelope.
    pub async fn msg_read_legacy(&mut self) -> Result<(u8, Vec<u8>), ErrorKind> {
        match &mut self.chan {
            Channel::Raw(stream) => {
                let mut header = [0u8; HEADER_LEN];
                read_exact_timeout(stream, &mut header, self.timeout).await?;
                let len = u16::from_be_bytes([header[1], header[2]]) as usize;
                let mut body = vec![0u8; len];
                read_exact_timeout(stream, &mut body, self.timeout).await?;
                Ok((header[0], body))
            }
            Channel::Ws(conn) => {
                let mut buf = vec![0u8; RECV_BUF_LEN];
                let (opcode, count) = conn.recv_message(&mut buf).await?;
                if opcode != OP_BINARY || count < HEADER_LEN {
                    return Err(ErrorKind::WsProto);
                }
                let declared = u16::from_be_bytes([buf[1], buf[2]]) as usize;
                if count != HEADER_LEN + declared {
                    return Err(ErrorKind::WsProto);
                }
                Ok((buf[0], buf[HEADER_LEN..count].to_vec()))
            }
        }
    }

    /// Read one message, unwrapping the JSON envelope when enabled.
    pub async fn msg_read(&mut self) -> Result<(u8, String), ErrorKind> {
        let (code, raw) = self.msg_read_legacy().await?;
        let body = if self.json {
            let parsed: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
                self.emit.warning(&format!("cannot parse message as JSON: {e}"));
                ErrorKind::Io
            })?;
            match parsed.get("msg").and_then(|v| v.as_str()) {
                Some(msg) => msg.to_string(),
                None => {
                    self.emit.warning("JSON message lacks the 'msg' field");
                    return Err(ErrorKind::Io);
                }
            }
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        self.emit
            .debug(&format!("received message type {} body {}", code, represent(body.as_bytes())));
        Ok((code, body))
    }

    /// Read one message and require the given type.
    pub async fn msg_expect(&mut self, expected: MsgType) -> Result<String, ErrorKind> {
        let (code, body) = self.msg_read().await?;
        if code != expected.as_u8() {
            self.emit.warning(&format!(
                "unexpected message type: wanted {} got {}",
                expected.as_u8(),
                code
            ));
            return Err(ErrorKind::Io);
        }
        Ok(body)
    }

    /// Read one message and require the given type with an empty body.
    pub async fn msg_expect_empty(&mut self, expected: MsgType) -> Result<(), ErrorKind> {
        let body = self.msg_expect(expected).await?;
        if !body.is_empty() {
            self.emit
                .warning(&format!("expected empty message, got {}", represent(body.as_bytes())));
            return Err(ErrorKind::Io);
        }
        Ok(())
    }

    /// Read the legacy 13-byte kickoff tag. Only meaningful on a raw
    /// channel; WebSocket sessions skip the kickoff entirely.
    pub async fn read_kickoff(&mut self) -> Result<(), ErrorKind> {
        const KICKOFF: &[u8] = b"123456 654321";
        match &mut self.chan {
            Channel::Raw(stream) => {
                let mut buf = [0u8; 13];
                read_exact_timeout(stream, &mut buf, self.timeout).await?;
                if buf != KICKOFF {
                    self.emit.warning("invalid kickoff message");
                    return Err(ErrorKind::Io);
                }
                Ok(())
            }
            Channel::Ws(_) => Ok(()),
        }
    }

    /// Give the server up to three seconds to close the connection,
    /// ignoring whatever happens on the wire.
    pub async fn wait_close(&mut self) {
        use tokio::io::AsyncReadExt;
        let grace = Duration::from_secs(3);
        match &mut self.chan {
            Channel::Raw(stream) => {
                let mut byte = [0u8; 1];
                let _ = tokio::time::timeout(grace, stream.read(&mut byte)).await;
            }
            Channel::Ws(conn) => {
                let mut buf = vec![0u8; 256];
                let _ = tokio::time::timeout(grace, conn.recv_message(&mut buf)).await;
            }
        }
    }
}
