//! Streaming WebSocket connection over an [`NdtStream`].
//!
//! Receives buffer whole messages: a message larger than the caller's
//! buffer fails with `MessageSize` rather than being decoded piecemeal.
//! Control frames are handled transparently during receive: PING gets a
//! PONG with the same payload, PONG is discarded, CLOSE is answered and
//! surfaces as a clean `Eof`.

use std::time::Duration;

use crate::errors::ErrorKind;
use crate::net::{read_exact_timeout, write_all_timeout, NdtStream};
use crate::ws::frame::{
    self, build_frame, is_control_opcode, random_mask, FIN_FLAG, MASK_FLAG, MAX_CONTROL_PAYLOAD,
    OP_CLOSE, OP_CONTINUE, OP_PING, OP_PONG, RESERVED_MASK,
};

/// One received frame; the payload sits in the caller's buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub opcode: u8,
    pub fin: bool,
    pub len: usize,
}

pub struct WsConn {
    stream: NdtStream,
    timeout: Duration,
}

impl WsConn {
    pub fn new(stream: NdtStream, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Raw fd of the underlying TCP socket.
    #[cfg(unix)]
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.stream.raw_fd()
    }

    /// Build a masked frame once, for repeated sending on a hot path.
    /// The mask is random but shared by every resend of this frame.
    pub fn prepare_frame(first_byte: u8, payload: &[u8]) -> Vec<u8> {
        build_frame(first_byte, random_mask(), payload).to_vec()
    }

    /// Send a pre-built frame as-is.
    pub async fn send_prepared(&mut self, frame: &[u8]) -> Result<(), ErrorKind> {
        write_all_timeout(&mut self.stream, frame, self.timeout).await
    }

    /// Send one frame with a fresh mask. `first_byte` carries FIN and the
    /// opcode.
    pub async fn send_frame(&mut self, first_byte: u8, payload: &[u8]) -> Result<(), ErrorKind> {
        let frame = build_frame(first_byte, random_mask(), payload);
        write_all_timeout(&mut self.stream, &frame, self.timeout).await
    }

    /// Send an unfragmented message.
    pub async fn send_message(&mut self, opcode: u8, payload: &[u8]) -> Result<(), ErrorKind> {
        self.send_frame(FIN_FLAG | opcode, payload).await
    }

    /// Read exactly one frame, enforcing the wire invariants: zero
    /// reserved bits, known opcode, server frames unmasked, control
    /// frames FIN-flagged and ≤125 bytes, 64-bit lengths without the
    /// high bit. The payload lands in `buf`.
    async fn recv_any_frame(&mut self, buf: &mut [u8]) -> Result<FrameInfo, ErrorKind> {
        let mut header = [0u8; 2];
        read_exact_timeout(&mut self.stream, &mut header, self.timeout).await?;

        if header[0] & RESERVED_MASK != 0 {
            return Err(ErrorKind::WsProto);
        }
        let fin = header[0] & FIN_FLAG != 0;
        let opcode = frame::validate_opcode(header[0] & 0x0F)?;
        if header[1] & MASK_FLAG != 0 {
            // Server-to-client frames must not be masked.
            return Err(ErrorKind::WsProto);
        }

        let length = match header[1] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                read_exact_timeout(&mut self.stream, &mut ext, self.timeout).await?;
                u16::from_be_bytes(ext) as u64
            }
            127 => {
                let mut ext = [0u8; 8];
                read_exact_timeout(&mut self.stream, &mut ext, self.timeout).await?;
                let len = u64::from_be_bytes(ext);
                if len & (1 << 63) != 0 {
                    return Err(ErrorKind::WsProto);
                }
                len
            }
            n => n as u64,
        };

        if is_control_opcode(opcode) && (!fin || length > MAX_CONTROL_PAYLOAD as u64) {
            return Err(ErrorKind::WsProto);
        }
        if length > buf.len() as u64 {
            return Err(ErrorKind::MessageSize);
        }
        let len = length as usize;
        read_exact_timeout(&mut self.stream, &mut buf[..len], self.timeout).await?;
        Ok(FrameInfo { opcode, fin, len })
    }

    /// Read the next data frame, transparently servicing control frames:
    /// PING is answered with a PONG carrying the identical payload, PONG
    /// is ignored, CLOSE is answered with a close and yields `Eof`.
    pub async fn recv_frame(&mut self, buf: &mut [u8]) -> Result<FrameInfo, ErrorKind> {
        loop {
            let info = self.recv_any_frame(buf).await?;
            match info.opcode {
                OP_PING => {
                    let payload = buf[..info.len].to_vec();
                    self.send_frame(FIN_FLAG | OP_PONG, &payload).await?;
                }
                OP_PONG => {}
                OP_CLOSE => {
                    self.send_frame(FIN_FLAG | OP_CLOSE, b"").await?;
                    return Err(ErrorKind::Eof);
                }
                _ => return Ok(info),
            }
        }
    }

    /// Read one complete message, reassembling fragments into `buf`.
    /// Returns the message opcode (`text` or `binary`) and total length.
    pub async fn recv_message(&mut self, buf: &mut [u8]) -> Result<(u8, usize), ErrorKind> {
        let first = self.recv_frame(buf).await?;
        if first.opcode != frame::OP_TEXT && first.opcode != frame::OP_BINARY {
            return Err(ErrorKind::WsProto);
        }
        let opcode = first.opcode;
        let mut total = first.len;
        let mut fin = first.fin;
        while !fin {
            if total >= buf.len() {
                return Err(ErrorKind::MessageSize);
            }
            let next = self.recv_frame(&mut buf[total..]).await?;
            if next.opcode != OP_CONTINUE {
                return Err(ErrorKind::WsProto);
            }
            total += next.len;
            fin = next.fin;
        }
        Ok((opcode, total))
    }
}
