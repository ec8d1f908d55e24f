//! ndt7 protocol driver: single-flow download and upload over
//! WebSocket-over-TLS, with quarter-second measurement snapshots.

pub mod measurement;

use std::time::{Duration, Instant};

use rand::RngCore;

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::net::{dial_channel, Channel, WsOpts};
use crate::settings::{NettestFlags, Settings};
use crate::tcpinfo;
use crate::transfer::XFER_BUF_LEN;
use crate::ws::frame::{FIN_FLAG, OP_BINARY, OP_TEXT};
use crate::ws::WsConn;

use measurement::{AppInfo, Measurement};

/// WebSocket subprotocol spoken by ndt7 endpoints.
pub const SUBPROTOCOL: &str = "net.measurementlab.ndt.v7";
pub const DOWNLOAD_PATH: &str = "/ndt/v7/download";
pub const UPLOAD_PATH: &str = "/ndt/v7/upload";

/// Size of the binary frames pushed during upload.
const UPLOAD_FRAME_LEN: usize = 1 << 13;
/// The upload runs for a fixed ten seconds, independent of the
/// configurable subtest cap.
const UPLOAD_DURATION: Duration = Duration::from_secs(10);
/// Cadence of measurement messages and performance events.
const MEASUREMENT_INTERVAL: Duration = Duration::from_millis(250);

/// Dial an ndt7 endpoint. TLS and WebSocket are always on here,
/// whatever the protocol flags say.
async fn connect(
    settings: &Settings,
    emit: &Emitter,
    host: &str,
    path: &str,
) -> Result<WsConn, ErrorKind> {
    let chan = dial_channel(
        settings,
        emit,
        host,
        settings.control_port(),
        true,
        WsOpts {
            enabled: true,
            protocol: SUBPROTOCOL,
            path,
        },
    )
    .await?;
    match chan {
        Channel::Ws(conn) => Ok(conn),
        Channel::Raw(_) => Err(ErrorKind::WsProto),
    }
}

/// Run the ndt7 download: read messages until the server closes,
/// surfacing every server measurement verbatim.
pub async fn download(settings: &Settings, emit: &Emitter, host: &str) -> Result<(), ErrorKind> {
    let mut conn = connect(settings, emit, host, DOWNLOAD_PATH).await?;
    emit.info("ndt7: starting download");

    let start = Instant::now();
    let mut prev = start;
    let mut total: u64 = 0;
    let mut buf = vec![0u8; XFER_BUF_LEN];
    loop {
        if start.elapsed() > settings.max_runtime {
            emit.warning("ndt7: download did not finish in time");
            return Err(ErrorKind::TimedOut);
        }
        match conn.recv_message(&mut buf).await {
            Ok((opcode, count)) => {
                total += count as u64;
                if opcode == OP_TEXT {
                    let text = String::from_utf8_lossy(&buf[..count]);
                    emit.result("ndt7", "download", &text);
                }
            }
            Err(ErrorKind::Eof) => break,
            Err(kind) => {
                emit.warning(&format!("ndt7: download failed: {kind}"));
                return Err(kind);
            }
        }
        if prev.elapsed() >= MEASUREMENT_INTERVAL {
            prev = Instant::now();
            emit.performance(
                NettestFlags::DOWNLOAD,
                1,
                total,
                start.elapsed().as_secs_f64(),
                settings.max_runtime.as_secs_f64(),
            );
        }
    }
    emit.info("ndt7: download complete");
    Ok(())
}

/// Run the ndt7 upload: push one pre-built masked binary frame for ten
/// seconds, interleaving client measurement messages every 250 ms.
pub async fn upload(settings: &Settings, emit: &Emitter, host: &str) -> Result<(), ErrorKind> {
    let mut conn = connect(settings, emit, host, UPLOAD_PATH).await?;
    emit.info("ndt7: starting upload");
    #[cfg(unix)]
    let fd = conn.raw_fd();

    let mut payload = vec![0u8; UPLOAD_FRAME_LEN];
    rand::thread_rng().fill_bytes(&mut payload);
    let frame = WsConn::prepare_frame(FIN_FLAG | OP_BINARY, &payload);

    let start = Instant::now();
    let mut prev = start;
    let mut total: u64 = 0;
    while start.elapsed() < UPLOAD_DURATION {
        if let Err(kind) = conn.send_prepared(&frame).await {
            emit.warning(&format!("ndt7: upload failed: {kind}"));
            return Err(kind);
        }
        total += payload.len() as u64;

        if prev.elapsed() >= MEASUREMENT_INTERVAL {
            prev = Instant::now();
            let elapsed_us = start.elapsed().as_micros() as i64;
            let snapshot = Measurement {
                app_info: Some(AppInfo {
                    elapsed_time: elapsed_us,
                    num_bytes: total as i64,
                }),
                #[cfg(unix)]
                tcp_info: tcpinfo::wire_snapshot(fd, elapsed_us),
                #[cfg(not(unix))]
                tcp_info: None,
            };
            let json = serde_json::to_string(&snapshot).map_err(|_| ErrorKind::Io)?;
            conn.send_message(OP_TEXT, json.as_bytes()).await?;
            emit.result("ndt7", "upload", &json);
            emit.performance(
                NettestFlags::UPLOAD,
                1,
                total,
                start.elapsed().as_secs_f64(),
                UPLOAD_DURATION.as_secs_f64(),
            );
        }
    }
    emit.info("ndt7: upload complete");
    Ok(())
}
