//! End-to-end ndt5 upload over WebSocket framing: the server checks that
//! every data frame from the client is masked, binary, and full-sized.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use common::{ws_read_frame, ws_read_ndt5_msg, ws_server_handshake, ws_write_ndt5_msg, Recorder};
use ndt_client::ws::frame::OP_BINARY;
use ndt_client::{Client, NettestFlags, ProtocolFlags, Settings, Verbosity};

const SRV_QUEUE: u8 = 1;
const LOGIN: u8 = 2;
const TEST_PREPARE: u8 = 3;
const TEST_START: u8 = 4;
const TEST_MSG: u8 = 5;
const TEST_FINALIZE: u8 = 6;
const RESULTS: u8 = 8;
const LOGOUT: u8 = 9;

#[tokio::test]
async fn websocket_upload_single_flow() {
    let ctrl_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ctrl_port = ctrl_listener.local_addr().unwrap().port();
    let meas_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let meas_port = meas_listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut ctrl, _) = ctrl_listener.accept().await.unwrap();
        ws_server_handshake(&mut ctrl, "/ndt_protocol", "ndt").await;

        let (code, body) = ws_read_ndt5_msg(&mut ctrl).await;
        assert_eq!(code, LOGIN);
        // upload | status | meta; no kickoff over WebSocket.
        assert_eq!(body, vec![0x02 | 0x10 | 0x20]);

        ws_write_ndt5_msg(&mut ctrl, SRV_QUEUE, b"0").await;
        ws_write_ndt5_msg(&mut ctrl, LOGIN, b"v3.7.0").await;
        ws_write_ndt5_msg(&mut ctrl, LOGIN, b"2").await;

        let prepare = format!("{meas_port} 0 0 0 0 1");
        ws_write_ndt5_msg(&mut ctrl, TEST_PREPARE, prepare.as_bytes()).await;

        let consumer = tokio::spawn(async move {
            let (mut meas, _) = meas_listener.accept().await.unwrap();
            ws_server_handshake(&mut meas, "/ndt_protocol", "c2s").await;
            for _ in 0..3 {
                let frame = ws_read_frame(&mut meas).await;
                assert!(frame.masked, "client data frames must be masked");
                assert!(frame.fin);
                assert_eq!(frame.opcode, OP_BINARY);
                assert_eq!(frame.payload.len(), 131072);
            }
            // Drain the rest until the client hangs up.
            let mut sink = vec![0u8; 65536];
            while meas.read(&mut sink).await.map(|n| n > 0).unwrap_or(false) {}
        });

        ws_write_ndt5_msg(&mut ctrl, TEST_START, b"").await;
        consumer.await.unwrap();

        ws_write_ndt5_msg(&mut ctrl, TEST_MSG, b"7777.7").await;
        ws_write_ndt5_msg(&mut ctrl, TEST_FINALIZE, b"").await;

        ws_write_ndt5_msg(&mut ctrl, RESULTS, b"upload:done\n").await;
        ws_write_ndt5_msg(&mut ctrl, LOGOUT, b"").await;
    });

    let recorder = Arc::new(Recorder::default());
    let mut protocol_flags = ProtocolFlags::default();
    protocol_flags.insert(ProtocolFlags::WEBSOCKET);
    let settings = Settings {
        hostname: "127.0.0.1".to_string(),
        port: Some(ctrl_port),
        nettest_flags: NettestFlags::UPLOAD,
        protocol_flags,
        max_runtime: Duration::from_secs(1),
        timeout: Duration::from_secs(5),
        verbosity: Verbosity::Quiet,
        ..Settings::default()
    };
    let client = Client::with_sink(settings, recorder.clone());
    assert!(client.run().await, "run must succeed");
    server.await.unwrap();

    assert_eq!(
        recorder.results_in_scope("summary"),
        vec![("upload".to_string(), "done".to_string())]
    );
    assert!(recorder.performance_count_for(NettestFlags::UPLOAD) >= 1);
    assert!(recorder.max_bytes_for(NettestFlags::UPLOAD) >= 131072);
}
