//! ndt-client -- NDT measurement client engine.
//!
//! Estimates achievable TCP throughput against an NDT server, speaking
//! both the legacy message-framed protocol (ndt5, optionally over JSON,
//! TLS, and WebSocket) and the WebSocket/JSON-over-TLS protocol (ndt7).
//! The typical usage is building a [`Client`] from [`Settings`] and
//! calling [`Client::run`]; everything observable flows through an
//! [`EventSink`].

pub mod errors;
pub mod events;
pub mod locate;
pub mod ndt5;
pub mod ndt7;
pub mod net;
pub mod settings;
pub mod tcpinfo;
pub mod transfer;
pub mod ws;

use std::sync::Arc;

pub use errors::ErrorKind;
pub use events::{EventSink, TracingSink};
pub use settings::{MlabnsPolicy, NettestFlags, ProtocolFlags, Settings, Verbosity};

use events::Emitter;

/// An NDT measurement client. One `run()` performs server discovery (when
/// needed), the control exchange, and the selected subtests.
pub struct Client {
    settings: Settings,
    emit: Emitter,
}

impl Client {
    /// Client with the default sink, which forwards events to `tracing`.
    pub fn new(settings: Settings) -> Self {
        Self::with_sink(settings, Arc::new(TracingSink))
    }

    /// Client reporting through a caller-provided sink.
    pub fn with_sink(mut settings: Settings, sink: Arc<dyn EventSink>) -> Self {
        settings.normalize();
        let emit = Emitter::new(sink, settings.verbosity);
        Self { settings, emit }
    }

    /// Run the measurement. Returns `true` on success; every detail of
    /// the outcome is reported through the sink along the way.
    pub async fn run(&self) -> bool {
        let fqdns = if !self.settings.hostname.is_empty() {
            vec![self.settings.hostname.clone()]
        } else {
            match locate::discover(&self.settings, &self.emit).await {
                Ok(fqdns) => fqdns,
                Err(kind) => {
                    self.emit
                        .warning(&format!("server discovery failed: {kind}"));
                    return false;
                }
            }
        };

        if self.settings.protocol_flags.contains(ProtocolFlags::NDT7) {
            // ndt7 has no busy-queue phase, so there is nothing to gain
            // from walking the candidate list: use the first server.
            self.run_ndt7(&fqdns[0]).await
        } else {
            self.run_ndt5(&fqdns).await
        }
    }

    async fn run_ndt5(&self, fqdns: &[String]) -> bool {
        for host in fqdns {
            match ndt5::protocol::run(&self.settings, &self.emit, host).await {
                Ok(()) => return true,
                Err(err) if err.fatal => {
                    self.emit
                        .warning(&format!("measurement against {host} failed: {}", err.kind));
                    return false;
                }
                Err(err) => {
                    self.emit.warning(&format!(
                        "cannot start measurement against {host} ({}); trying the next server",
                        err.kind
                    ));
                }
            }
        }
        false
    }

    async fn run_ndt7(&self, host: &str) -> bool {
        let flags = self.settings.nettest_flags;
        if flags.contains(NettestFlags::DOWNLOAD) || flags.contains(NettestFlags::DOWNLOAD_EXT) {
            if let Err(kind) = ndt7::download(&self.settings, &self.emit, host).await {
                self.emit
                    .warning(&format!("ndt7 download failed: {kind}"));
                return false;
            }
        }
        if flags.contains(NettestFlags::UPLOAD) {
            if let Err(kind) = ndt7::upload(&self.settings, &self.emit, host).await {
                self.emit.warning(&format!("ndt7 upload failed: {kind}"));
                return false;
            }
        }
        true
    }
}
