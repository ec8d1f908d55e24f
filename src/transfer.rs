//! Bulk-transfer engine shared by the ndt5 subtests.
//!
//! One worker task per measurement socket pumps bytes in the configured
//! direction; a sampler on the calling task emits a progress event every
//! 250 ms until the last worker exits. Workers and sampler share nothing
//! but three atomics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::net::Channel;
use crate::settings::NettestFlags;
use crate::ws::frame::{FIN_FLAG, OP_BINARY};
use crate::ws::WsConn;

/// Buffer size for measurement flows.
pub const XFER_BUF_LEN: usize = 1 << 17;

/// Sampler cadence.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server to client: workers receive.
    Recv,
    /// Client to server: workers send.
    Send,
}

/// Shared progress counters. `total` and `recent` only grow from worker
/// adds; `recent` is drained by the sampler for interval logging.
struct Counters {
    total: AtomicU64,
    recent: AtomicU64,
    active: AtomicUsize,
}

/// Outcome of one engine run.
#[derive(Debug, Clone, Copy)]
pub struct TransferResult {
    pub total_bytes: u64,
    pub elapsed: f64,
}

/// Goodput in kbit/s; zero when no time has passed.
pub fn compute_speed(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        bytes as f64 * 8.0 / 1000.0 / elapsed_secs
    } else {
        0.0
    }
}

/// Fill the buffer with random printable ASCII (0x20..=0x7E).
pub fn fill_random_printable(buf: &mut [u8]) {
    let mut rng = rand::thread_rng();
    for byte in buf.iter_mut() {
        *byte = rng.gen_range(b' '..=b'~');
    }
}

/// Run one subtest transfer over the given flows and report the byte
/// total and elapsed wall-clock once every worker has exited.
///
/// `payload` is the buffer uploaded by send-direction workers; it is
/// unused when receiving.
pub async fn run_flows(
    subtest: NettestFlags,
    flows: Vec<Channel>,
    direction: Direction,
    payload: Arc<Vec<u8>>,
    max_runtime: Duration,
    io_timeout: Duration,
    emit: &Emitter,
) -> TransferResult {
    let nflows = flows.len() as u8;
    let counters = Arc::new(Counters {
        total: AtomicU64::new(0),
        recent: AtomicU64::new(0),
        active: AtomicUsize::new(flows.len()),
    });
    let start = Instant::now();

    let mut handles = Vec::with_capacity(flows.len());
    for chan in flows {
        let counters = Arc::clone(&counters);
        let payload = Arc::clone(&payload);
        let emit = emit.clone();
        handles.push(tokio::spawn(async move {
            match direction {
                Direction::Recv => {
                    worker_recv(chan, &counters, start, max_runtime, io_timeout, &emit).await
                }
                Direction::Send => {
                    worker_send(chan, &payload, &counters, start, max_runtime, io_timeout, &emit)
                        .await
                }
            }
            counters.active.fetch_sub(1, Ordering::AcqRel);
        }));
    }

    loop {
        tokio::time::sleep(SAMPLE_INTERVAL).await;
        let elapsed = start.elapsed().as_secs_f64();
        let total = counters.total.load(Ordering::Acquire);
        let recent = counters.recent.swap(0, Ordering::AcqRel);
        emit.debug(&format!(
            "interval speed: {:.0} kbit/s",
            compute_speed(recent, SAMPLE_INTERVAL.as_secs_f64())
        ));
        emit.performance(
            subtest,
            nflows,
            total,
            elapsed,
            max_runtime.as_secs_f64(),
        );
        if counters.active.load(Ordering::Acquire) == 0 {
            break;
        }
    }
    for handle in handles {
        let _ = handle.await;
    }

    TransferResult {
        total_bytes: counters.total.load(Ordering::Acquire),
        elapsed: start.elapsed().as_secs_f64(),
    }
}

async fn worker_recv(
    chan: Channel,
    counters: &Counters,
    start: Instant,
    max_runtime: Duration,
    io_timeout: Duration,
    emit: &Emitter,
) {
    let mut buf = vec![0u8; XFER_BUF_LEN];
    match chan {
        Channel::Raw(mut stream) => loop {
            if start.elapsed() >= max_runtime {
                break;
            }
            match tokio::time::timeout(io_timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    emit.debug("download flow: end of stream");
                    break;
                }
                Ok(Ok(n)) => {
                    counters.total.fetch_add(n as u64, Ordering::AcqRel);
                    counters.recent.fetch_add(n as u64, Ordering::AcqRel);
                }
                Ok(Err(e)) => {
                    emit.warning(&format!("download flow: recv failed: {}", ErrorKind::from_io(&e)));
                    break;
                }
                Err(_) => {
                    emit.warning("download flow: recv timed out");
                    break;
                }
            }
        },
        Channel::Ws(mut conn) => loop {
            if start.elapsed() >= max_runtime {
                break;
            }
            match conn.recv_message(&mut buf).await {
                Ok((OP_BINARY, n)) => {
                    counters.total.fetch_add(n as u64, Ordering::AcqRel);
                    counters.recent.fetch_add(n as u64, Ordering::AcqRel);
                }
                Ok((opcode, _)) => {
                    emit.warning(&format!("download flow: unexpected opcode {opcode}"));
                    break;
                }
                Err(ErrorKind::Eof) => {
                    emit.debug("download flow: peer closed the channel");
                    break;
                }
                Err(kind) => {
                    emit.warning(&format!("download flow: recv failed: {kind}"));
                    break;
                }
            }
        },
    }
}

async fn worker_send(
    chan: Channel,
    payload: &[u8],
    counters: &Counters,
    start: Instant,
    max_runtime: Duration,
    io_timeout: Duration,
    emit: &Emitter,
) {
    match chan {
        Channel::Raw(mut stream) => loop {
            if start.elapsed() >= max_runtime {
                break;
            }
            match tokio::time::timeout(io_timeout, stream.write(payload)).await {
                Ok(Ok(n)) => {
                    counters.total.fetch_add(n as u64, Ordering::AcqRel);
                    counters.recent.fetch_add(n as u64, Ordering::AcqRel);
                }
                Ok(Err(e)) => {
                    // The server tears the connection down at the end of
                    // the measurement; a broken pipe here is expected.
                    let kind = ErrorKind::from_io(&e);
                    if kind != ErrorKind::BrokenPipe {
                        emit.warning(&format!("upload flow: send failed: {kind}"));
                    }
                    break;
                }
                Err(_) => {
                    emit.warning("upload flow: send timed out");
                    break;
                }
            }
        },
        Channel::Ws(mut conn) => {
            let frame = WsConn::prepare_frame(FIN_FLAG | OP_BINARY, payload);
            loop {
                if start.elapsed() >= max_runtime {
                    break;
                }
                match conn.send_prepared(&frame).await {
                    Ok(()) => {
                        counters.total.fetch_add(payload.len() as u64, Ordering::AcqRel);
                        counters.recent.fetch_add(payload.len() as u64, Ordering::AcqRel);
                    }
                    Err(kind) => {
                        if kind != ErrorKind::BrokenPipe {
                            emit.warning(&format!("upload flow: send failed: {kind}"));
                        }
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_formula() {
        // 1000 bytes in 1 s = 8 kbit/s
        assert_eq!(compute_speed(1000, 1.0), 8.0);
        // 14 s at 131072 bytes/s
        let speed = compute_speed(131072 * 14, 14.0);
        assert!((speed - 131072.0 * 8.0 / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn speed_is_zero_without_elapsed_time() {
        assert_eq!(compute_speed(12345, 0.0), 0.0);
        assert_eq!(compute_speed(12345, -1.0), 0.0);
    }

    #[test]
    fn random_fill_is_printable() {
        let mut buf = vec![0u8; 4096];
        fill_random_printable(&mut buf);
        assert!(buf.iter().all(|&b| (b' '..=b'~').contains(&b)));
        // A uniform draw over 95 symbols should touch many of them.
        let distinct: std::collections::BTreeSet<u8> = buf.iter().copied().collect();
        assert!(distinct.len() > 32);
    }
}
