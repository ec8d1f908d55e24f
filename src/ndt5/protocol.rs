//! ndt5 control-protocol driver.
//!
//! Runs the linear phase sequence: login, kickoff, queue, version and
//! test-id exchange, the granted subtests, then results and logout.
//! Failures before the server authorizes the test are transient (the
//! caller moves on to the next discovered server); failures after are
//! fatal for the whole run.

use std::sync::Arc;

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::ndt5::codec::{represent, ControlChannel, MsgType};
use crate::net::{dial_channel, WsOpts};
use crate::settings::{NettestFlags, ProtocolFlags, Settings};
use crate::transfer::{
    self, compute_speed, fill_random_printable, Direction, XFER_BUF_LEN,
};

/// Cap on result/variable message loops, so a chatty server cannot hold
/// the session open forever.
const MAX_LOOPS: usize = 256;

/// Failure from one server attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptError {
    pub kind: ErrorKind,
    /// Fatal errors abort the run; transient ones move to the next
    /// discovered server.
    pub fatal: bool,
}

impl AttemptError {
    fn transient(kind: ErrorKind) -> Self {
        Self { kind, fatal: false }
    }

    fn fatal(kind: ErrorKind) -> Self {
        Self { kind, fatal: true }
    }
}

/// Emit a block of `key: value` result lines under `scope`. Malformed
/// lines are warned about and skipped.
fn emit_kv_results(emit: &Emitter, scope: &str, body: &str) {
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(':');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(name), Some(value), None) => {
                let trim = |s: &str| s.trim_matches([' ', '\t']).to_string();
                emit.result(scope, &trim(name), &trim(value));
            }
            _ => emit.warning(&format!("malformed {scope} line: {line}")),
        }
    }
}

/// Parse a `TEST_PREPARE` options vector: `options[0]` is the
/// measurement port, `options[5]` (when present) the number of flows.
fn parse_test_prepare(body: &str) -> Result<(u16, u8), &'static str> {
    let options: Vec<&str> = body.split_whitespace().collect();
    let first = options.first().ok_or("empty options vector")?;
    let port: u32 = first.parse().map_err(|_| "cannot parse port")?;
    if !(1..=u16::MAX as u32).contains(&port) {
        return Err("port out of range");
    }
    let mut nflows = 1u8;
    if options.len() >= 6 {
        let parsed: u32 = options[5].parse().map_err(|_| "cannot parse num-flows")?;
        if !(1..=16).contains(&parsed) {
            return Err("num-flows out of range");
        }
        nflows = parsed as u8;
    }
    Ok((port as u16, nflows))
}

/// Parse the space-separated granted test-id list.
fn parse_test_ids(body: &str) -> Result<Vec<u16>, &'static str> {
    let mut ids = Vec::new();
    for token in body.split_whitespace() {
        let id: u16 = token.parse().map_err(|_| "invalid test id")?;
        if !(1..=256).contains(&id) {
            return Err("test id out of range");
        }
        ids.push(id);
    }
    Ok(ids)
}

struct Driver<'a> {
    settings: &'a Settings,
    emit: &'a Emitter,
    host: &'a str,
    ctrl: ControlChannel,
}

/// Run the whole ndt5 session against one server.
pub async fn run(
    settings: &Settings,
    emit: &Emitter,
    host: &str,
) -> Result<(), AttemptError> {
    let use_tls = settings.protocol_flags.contains(ProtocolFlags::TLS);
    let use_ws = settings.protocol_flags.contains(ProtocolFlags::WEBSOCKET);
    let use_json = settings.protocol_flags.contains(ProtocolFlags::JSON);

    let chan = dial_channel(
        settings,
        emit,
        host,
        settings.control_port(),
        use_tls,
        WsOpts {
            enabled: use_ws,
            protocol: "ndt",
            path: "/ndt_protocol",
        },
    )
    .await
    .map_err(AttemptError::transient)?;
    emit.info("connected to remote host");

    let mut ctrl = ControlChannel::new(chan, use_json, settings.timeout, emit.clone());
    ctrl.msg_write_login(settings.nettest_flags)
        .await
        .map_err(AttemptError::transient)?;
    emit.info("sent login message");

    if !use_ws {
        ctrl.read_kickoff().await.map_err(AttemptError::transient)?;
        emit.info("received kickoff message");
    }

    let queue = ctrl
        .msg_expect(MsgType::SrvQueue)
        .await
        .map_err(AttemptError::transient)?;
    if queue != "0" {
        emit.server_busy(&queue);
        return Err(AttemptError::transient(ErrorKind::Io));
    }
    emit.info("authorized to run test");

    let version = ctrl
        .msg_expect(MsgType::Login)
        .await
        .map_err(AttemptError::fatal)?;
    emit.debug(&format!("server version: {version}"));

    let ids_body = ctrl
        .msg_expect(MsgType::Login)
        .await
        .map_err(AttemptError::fatal)?;
    let ids = parse_test_ids(&ids_body).map_err(|reason| {
        emit.warning(&format!("invalid granted test list: {reason}"));
        AttemptError::fatal(ErrorKind::Io)
    })?;
    emit.info("received tests ids");

    let mut driver = Driver {
        settings,
        emit,
        host,
        ctrl,
    };
    for id in ids {
        match id {
            id if id == NettestFlags::UPLOAD.bits() as u16 => {
                emit.info("running upload test");
                driver.run_upload().await?;
            }
            id if id == NettestFlags::META.bits() as u16 => {
                emit.debug("running meta test");
                driver.run_meta().await?;
            }
            id if id == NettestFlags::DOWNLOAD.bits() as u16
                || id == NettestFlags::DOWNLOAD_EXT.bits() as u16 =>
            {
                emit.info("running download test");
                driver.run_download().await?;
            }
            other => {
                emit.warning(&format!("unexpected granted test id: {other}"));
                return Err(AttemptError::fatal(ErrorKind::Io));
            }
        }
    }
    emit.info("finished running tests; now reading summary data");

    driver.recv_results_and_logout().await?;
    emit.info("received logout message");
    driver.ctrl.wait_close().await;
    emit.info("connection closed");
    Ok(())
}

impl Driver<'_> {
    async fn expect_test_prepare(&mut self) -> Result<(u16, u8), AttemptError> {
        let body = self
            .ctrl
            .msg_expect(MsgType::TestPrepare)
            .await
            .map_err(AttemptError::fatal)?;
        parse_test_prepare(&body).map_err(|reason| {
            self.emit.warning(&format!("invalid test-prepare options: {reason}"));
            AttemptError::fatal(ErrorKind::Io)
        })
    }

    /// Dial one measurement flow. WebSocket upgrades must not be
    /// interleaved, so callers dial flows one at a time.
    async fn dial_flow(
        &self,
        port: u16,
        subprotocol: &str,
    ) -> Result<crate::net::Channel, AttemptError> {
        let use_tls = self.settings.protocol_flags.contains(ProtocolFlags::TLS);
        let use_ws = self.settings.protocol_flags.contains(ProtocolFlags::WEBSOCKET);
        dial_channel(
            self.settings,
            self.emit,
            self.host,
            port,
            use_tls,
            WsOpts {
                enabled: use_ws,
                protocol: subprotocol,
                path: "/ndt_protocol",
            },
        )
        .await
        .map_err(AttemptError::fatal)
    }

    async fn run_download(&mut self) -> Result<(), AttemptError> {
        let (port, nflows) = self.expect_test_prepare().await?;

        let mut flows = Vec::with_capacity(nflows as usize);
        for _ in 0..nflows {
            flows.push(self.dial_flow(port, "s2c").await?);
        }

        self.ctrl
            .msg_expect_empty(MsgType::TestStart)
            .await
            .map_err(AttemptError::fatal)?;

        let result = transfer::run_flows(
            NettestFlags::DOWNLOAD,
            flows,
            Direction::Recv,
            Arc::new(Vec::new()),
            self.settings.max_runtime,
            self.settings.timeout,
            self.emit,
        )
        .await;
        let client_speed = compute_speed(result.total_bytes, result.elapsed);

        // The server-side speed arrives un-enveloped even in JSON mode.
        let (code, body) = self
            .ctrl
            .msg_read_legacy()
            .await
            .map_err(AttemptError::fatal)?;
        if code != MsgType::TestMsg.as_u8() {
            self.emit.warning("expected the server-computed speed message");
            return Err(AttemptError::fatal(ErrorKind::Io));
        }
        self.emit
            .debug(&format!("server computed speed: {}", represent(&body)));

        self.ctrl
            .msg_write(MsgType::TestMsg, &client_speed.to_string())
            .await
            .map_err(AttemptError::fatal)?;

        self.emit.info("reading summary web100 variables");
        for _ in 0..MAX_LOOPS {
            let (code, body) = self.ctrl.msg_read().await.map_err(AttemptError::fatal)?;
            if code == MsgType::TestFinalize.as_u8() {
                return Ok(());
            }
            if code != MsgType::TestMsg.as_u8() {
                self.emit.warning("unexpected message while reading web100 variables");
                return Err(AttemptError::fatal(ErrorKind::Io));
            }
            emit_kv_results(self.emit, "web100", &body);
        }
        self.emit.warning("too many web100 variable messages");
        Err(AttemptError::fatal(ErrorKind::Io))
    }

    async fn run_upload(&mut self) -> Result<(), AttemptError> {
        let mut payload = vec![0u8; XFER_BUF_LEN];
        fill_random_printable(&mut payload);

        let (port, nflows) = self.expect_test_prepare().await?;
        if nflows != 1 {
            self.emit
                .warning(&format!("upload wants a single flow, server asked for {nflows}"));
            return Err(AttemptError::fatal(ErrorKind::Io));
        }

        let flows = vec![self.dial_flow(port, "c2s").await?];

        self.ctrl
            .msg_expect_empty(MsgType::TestStart)
            .await
            .map_err(AttemptError::fatal)?;

        let result = transfer::run_flows(
            NettestFlags::UPLOAD,
            flows,
            Direction::Send,
            Arc::new(payload),
            self.settings.max_runtime,
            self.settings.timeout,
            self.emit,
        )
        .await;
        self.emit.debug(&format!(
            "client computed speed: {} kbit/s",
            compute_speed(result.total_bytes, result.elapsed)
        ));

        let server_speed = self
            .ctrl
            .msg_expect(MsgType::TestMsg)
            .await
            .map_err(AttemptError::fatal)?;
        self.emit
            .debug(&format!("server computed speed: {server_speed}"));

        self.ctrl
            .msg_expect_empty(MsgType::TestFinalize)
            .await
            .map_err(AttemptError::fatal)?;
        Ok(())
    }

    async fn run_meta(&mut self) -> Result<(), AttemptError> {
        self.ctrl
            .msg_expect_empty(MsgType::TestPrepare)
            .await
            .map_err(AttemptError::fatal)?;
        self.ctrl
            .msg_expect_empty(MsgType::TestStart)
            .await
            .map_err(AttemptError::fatal)?;

        for (key, value) in &self.settings.metadata {
            self.ctrl
                .msg_write(MsgType::TestMsg, &format!("{key}:{value}"))
                .await
                .map_err(AttemptError::fatal)?;
        }
        // An empty TEST_MSG terminates the metadata list.
        self.ctrl
            .msg_write(MsgType::TestMsg, "")
            .await
            .map_err(AttemptError::fatal)?;

        self.ctrl
            .msg_expect_empty(MsgType::TestFinalize)
            .await
            .map_err(AttemptError::fatal)?;
        Ok(())
    }

    async fn recv_results_and_logout(&mut self) -> Result<(), AttemptError> {
        for _ in 0..MAX_LOOPS {
            let (code, body) = self.ctrl.msg_read().await.map_err(AttemptError::fatal)?;
            if code == MsgType::Logout.as_u8() {
                return Ok(());
            }
            if code != MsgType::Results.as_u8() {
                self.emit.warning("unexpected message while reading results");
                return Err(AttemptError::fatal(ErrorKind::Io));
            }
            emit_kv_results(self.emit, "summary", &body);
        }
        self.emit.warning("too many results messages");
        Err(AttemptError::fatal(ErrorKind::Io))
    }
}
