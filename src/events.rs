//! Observer interface for measurement events.
//!
//! The engine reports everything user-visible through an [`EventSink`]:
//! log lines at three severities, per-variable results, periodic
//! performance snapshots, and the server-busy signal. Sinks may be called
//! from worker tasks; the [`Emitter`] serializes all sink invocations
//! behind one mutex so implementations need not be re-entrant.

use std::sync::{Arc, Mutex};

use crate::settings::{NettestFlags, Verbosity};

/// Receiver of measurement events. Implementations must not call back
/// into the engine.
pub trait EventSink: Send + Sync {
    fn on_warning(&self, msg: &str);
    fn on_info(&self, msg: &str);
    fn on_debug(&self, msg: &str);

    /// A single measured variable. `scope` is `"summary"`, `"web100"`, or
    /// `"ndt7"`.
    fn on_result(&self, scope: &str, name: &str, value: &str);

    /// Periodic progress snapshot for a running subtest. `measured_bytes`
    /// is the byte total since the subtest began; `elapsed / max_runtime`
    /// gives the completion fraction.
    fn on_performance(
        &self,
        subtest: NettestFlags,
        nflows: u8,
        measured_bytes: u64,
        elapsed: f64,
        max_runtime: f64,
    );

    /// The server declined to run the test now. `reason` is the queue
    /// message body as received.
    fn on_server_busy(&self, reason: &str);
}

/// Verbosity-gated, mutex-serialized front end over an [`EventSink`].
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
    verbosity: Verbosity,
    lock: Arc<Mutex<()>>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn EventSink>, verbosity: Verbosity) -> Self {
        Self {
            sink,
            verbosity,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn warning(&self, msg: &str) {
        if self.verbosity >= Verbosity::Warning {
            let _guard = self.lock.lock().unwrap();
            self.sink.on_warning(msg);
        }
    }

    pub fn info(&self, msg: &str) {
        if self.verbosity >= Verbosity::Info {
            let _guard = self.lock.lock().unwrap();
            self.sink.on_info(msg);
        }
    }

    pub fn debug(&self, msg: &str) {
        if self.verbosity >= Verbosity::Debug {
            let _guard = self.lock.lock().unwrap();
            self.sink.on_debug(msg);
        }
    }

    pub fn result(&self, scope: &str, name: &str, value: &str) {
        let _guard = self.lock.lock().unwrap();
        self.sink.on_result(scope, name, value);
    }

    pub fn performance(
        &self,
        subtest: NettestFlags,
        nflows: u8,
        measured_bytes: u64,
        elapsed: f64,
        max_runtime: f64,
    ) {
        let _guard = self.lock.lock().unwrap();
        self.sink
            .on_performance(subtest, nflows, measured_bytes, elapsed, max_runtime);
    }

    pub fn server_busy(&self, reason: &str) {
        let _guard = self.lock.lock().unwrap();
        self.sink.on_server_busy(reason);
    }
}

/// Default sink: forwards everything to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn on_info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn on_debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    fn on_result(&self, scope: &str, name: &str, value: &str) {
        tracing::info!(scope, name, value, "result");
    }

    fn on_performance(
        &self,
        subtest: NettestFlags,
        nflows: u8,
        measured_bytes: u64,
        elapsed: f64,
        max_runtime: f64,
    ) {
        let speed = crate::transfer::compute_speed(measured_bytes, elapsed);
        let percent = if max_runtime > 0.0 {
            elapsed * 100.0 / max_runtime
        } else {
            0.0
        };
        tracing::info!(
            subtest = subtest.bits(),
            nflows,
            elapsed_s = format_args!("{elapsed:.3}"),
            speed_kbit_s = format_args!("{speed:.0}"),
            "[{percent:.0}%] transfer in progress"
        );
    }

    fn on_server_busy(&self, reason: &str) {
        tracing::warn!(reason, "server is busy");
    }
}
