//! Shared scaffolding for the end-to-end tests: an event recorder and
//! server-side helpers for the ndt5 and WebSocket wire formats.
#![allow(dead_code)]

use std::sync::Mutex;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ndt_client::settings::NettestFlags;
use ndt_client::ws::frame::{apply_mask, FIN_FLAG, MASK_FLAG};
use ndt_client::EventSink;

// ---------------------------------------------------------------------------
// Event recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Recorder {
    pub results: Mutex<Vec<(String, String, String)>>,
    pub performance: Mutex<Vec<(u8, u8, u64, f64)>>,
    pub busy: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn results_in_scope(&self, scope: &str) -> Vec<(String, String)> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == scope)
            .map(|(_, name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub fn performance_count_for(&self, subtest: NettestFlags) -> usize {
        self.performance
            .lock()
            .unwrap()
            .iter()
            .filter(|(tid, _, _, _)| *tid == subtest.bits())
            .count()
    }

    pub fn max_bytes_for(&self, subtest: NettestFlags) -> u64 {
        self.performance
            .lock()
            .unwrap()
            .iter()
            .filter(|(tid, _, _, _)| *tid == subtest.bits())
            .map(|(_, _, bytes, _)| *bytes)
            .max()
            .unwrap_or(0)
    }
}

impl EventSink for Recorder {
    fn on_warning(&self, msg: &str) {
        self.warnings.lock().unwrap().push(msg.to_string());
    }
    fn on_info(&self, _: &str) {}
    fn on_debug(&self, _: &str) {}
    fn on_result(&self, scope: &str, name: &str, value: &str) {
        self.results
            .lock()
            .unwrap()
            .push((scope.to_string(), name.to_string(), value.to_string()));
    }
    fn on_performance(
        &self,
        subtest: NettestFlags,
        nflows: u8,
        measured_bytes: u64,
        elapsed: f64,
        _max_runtime: f64,
    ) {
        self.performance
            .lock()
            .unwrap()
            .push((subtest.bits(), nflows, measured_bytes, elapsed));
    }
    fn on_server_busy(&self, reason: &str) {
        self.busy.lock().unwrap().push(reason.to_string());
    }
}

// ---------------------------------------------------------------------------
// ndt5 raw framing, server side
// ---------------------------------------------------------------------------

pub async fn write_ndt5_msg<S: AsyncWrite + Unpin>(stream: &mut S, code: u8, body: &[u8]) {
    let mut wire = Vec::with_capacity(3 + body.len());
    wire.push(code);
    wire.extend_from_slice(&(body.len() as u16).to_be_bytes());
    wire.extend_from_slice(body);
    stream.write_all(&wire).await.expect("server write");
}

pub async fn read_ndt5_msg<S: AsyncRead + Unpin>(stream: &mut S) -> (u8, Vec<u8>) {
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await.expect("server read header");
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.expect("server read body");
    (header[0], body)
}

// ---------------------------------------------------------------------------
// WebSocket framing, server side
// ---------------------------------------------------------------------------

/// A frame as the server read it off the wire.
#[derive(Debug, Clone)]
pub struct ServerFrame {
    pub fin: bool,
    pub opcode: u8,
    pub masked: bool,
    pub payload: Vec<u8>,
}

/// Read one client frame, unmasking the payload.
pub async fn ws_read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> ServerFrame {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.expect("frame header");
    let fin = header[0] & FIN_FLAG != 0;
    let opcode = header[0] & 0x0F;
    let masked = header[1] & MASK_FLAG != 0;
    let len = match header[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext).await.expect("frame len16");
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext).await.expect("frame len64");
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };
    let key = if masked {
        let mut key = [0u8; 4];
        stream.read_exact(&mut key).await.expect("frame mask");
        Some(key)
    } else {
        None
    };
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.expect("frame payload");
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }
    ServerFrame {
        fin,
        opcode,
        masked,
        payload,
    }
}

/// Write one unmasked server frame.
pub async fn ws_write_frame<S: AsyncWrite + Unpin>(stream: &mut S, first_byte: u8, payload: &[u8]) {
    let mut wire = Vec::with_capacity(10 + payload.len());
    wire.push(first_byte);
    if payload.len() < 126 {
        wire.push(payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        wire.push(126);
        wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        wire.push(127);
        wire.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    wire.extend_from_slice(payload);
    stream.write_all(&wire).await.expect("server frame write");
}

/// Accept a client WebSocket upgrade, asserting the advertised
/// subprotocol, and reply 101.
pub async fn ws_server_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    expected_path: &str,
    expected_protocol: &str,
) {
    let mut request = Vec::new();
    let mut byte = [0u8; 1];
    while !request.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.expect("upgrade request");
        request.push(byte[0]);
    }
    let request = String::from_utf8(request).expect("utf8 request");
    let request_line = request.lines().next().expect("request line");
    assert_eq!(request_line, format!("GET {expected_path} HTTP/1.1"));

    let mut key = None;
    let mut protocol = None;
    for line in request.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            if name.eq_ignore_ascii_case("sec-websocket-key") {
                key = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("sec-websocket-protocol") {
                protocol = Some(value.to_string());
            }
        }
    }
    let key = key.expect("client sent a key");
    assert_eq!(protocol.as_deref(), Some(expected_protocol));

    let accept = ndt_client::ws::handshake::accept_for_key(&key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         Sec-WebSocket-Protocol: {expected_protocol}\r\n\
         \r\n"
    );
    stream
        .write_all(response.as_bytes())
        .await
        .expect("upgrade response");
}

/// Read one complete client message (one or more frames), unmasked and
/// reassembled.
pub async fn ws_read_message<S: AsyncRead + Unpin>(stream: &mut S) -> (u8, Vec<u8>) {
    let first = ws_read_frame(stream).await;
    let opcode = first.opcode;
    let mut payload = first.payload;
    let mut fin = first.fin;
    while !fin {
        let next = ws_read_frame(stream).await;
        payload.extend_from_slice(&next.payload);
        fin = next.fin;
    }
    (opcode, payload)
}

/// Read one ndt5 message carried over WebSocket frames.
pub async fn ws_read_ndt5_msg<S: AsyncRead + Unpin>(stream: &mut S) -> (u8, Vec<u8>) {
    let (_, wire) = ws_read_message(stream).await;
    assert!(wire.len() >= 3, "ndt5 message too short");
    let len = u16::from_be_bytes([wire[1], wire[2]]) as usize;
    assert_eq!(wire.len(), 3 + len);
    (wire[0], wire[3..].to_vec())
}

/// Send an ndt5 message as a single FIN-flagged binary frame.
pub async fn ws_write_ndt5_msg<S: AsyncWrite + Unpin>(stream: &mut S, code: u8, body: &[u8]) {
    let mut wire = Vec::with_capacity(3 + body.len());
    wire.push(code);
    wire.extend_from_slice(&(body.len() as u16).to_be_bytes());
    wire.extend_from_slice(body);
    ws_write_frame(stream, FIN_FLAG | 0x02, &wire).await;
}
