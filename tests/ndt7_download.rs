//! ndt7 download against a scripted TLS + WebSocket server: binary
//! frames count toward the total, server measurements surface verbatim,
//! and a server-initiated close ends the test successfully.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use common::{ws_read_frame, ws_server_handshake, ws_write_frame, Recorder};
use ndt_client::events::Emitter;
use ndt_client::ws::frame::{FIN_FLAG, OP_BINARY, OP_CLOSE, OP_TEXT};
use ndt_client::{ndt7, ProtocolFlags, Settings, Verbosity};

const SERVER_MEASUREMENT: &str =
    r#"{"AppInfo":{"ElapsedTime":1000000,"NumBytes":91000},"Origin":"server"}"#;

fn test_server_config() -> rustls::ServerConfig {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();
    let certs = vec![CertificateDer::from(cert.der().to_vec())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap()
}

#[tokio::test]
async fn download_surfaces_measurements_and_ends_on_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = TlsAcceptor::from(Arc::new(test_server_config()));

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.expect("tls accept");
        ws_server_handshake(&mut tls, "/ndt/v7/download", "net.measurementlab.ndt.v7").await;

        for len in [1000usize, 20000, 70000] {
            ws_write_frame(&mut tls, FIN_FLAG | OP_BINARY, &vec![0x5Au8; len]).await;
        }
        ws_write_frame(&mut tls, FIN_FLAG | OP_TEXT, SERVER_MEASUREMENT.as_bytes()).await;
        ws_write_frame(&mut tls, FIN_FLAG | OP_CLOSE, b"").await;

        // The client must answer with a masked close.
        let reply = ws_read_frame(&mut tls).await;
        assert_eq!(reply.opcode, OP_CLOSE);
        assert!(reply.masked);
    });

    let recorder = Arc::new(Recorder::default());
    let emit = Emitter::new(recorder.clone(), Verbosity::Quiet);
    let mut settings = Settings {
        hostname: "127.0.0.1".to_string(),
        port: Some(port),
        protocol_flags: ProtocolFlags::NDT7,
        tls_verify_peer: false,
        timeout: Duration::from_secs(5),
        ..Settings::default()
    };
    settings.normalize();

    ndt7::download(&settings, &emit, "127.0.0.1")
        .await
        .expect("download must succeed on server close");
    server.await.unwrap();

    let surfaced = recorder.results_in_scope("ndt7");
    assert_eq!(
        surfaced,
        vec![("download".to_string(), SERVER_MEASUREMENT.to_string())]
    );
}
