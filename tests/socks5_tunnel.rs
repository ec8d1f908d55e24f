//! SOCKSv5h tunnelled connect followed by a TLS handshake through the
//! tunnel: the proxy sees the exact RFC 1928 byte sequences, with the
//! hostname (not an address) in the CONNECT request.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use common::Recorder;
use ndt_client::events::Emitter;
use ndt_client::net::{dial_stream, NdtStream};
use ndt_client::{Settings, Verbosity};

fn test_server_config(hostname: &str) -> rustls::ServerConfig {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec![hostname.to_string()])
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
async fn socks5h_connect_then_tls() {
    // Backend: a bare TLS server standing in for example.test:443.
    let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(test_server_config("example.test")));
    let backend = tokio::spawn(async move {
        let (tcp, _) = backend_listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.expect("server-side handshake");
        let mut greeting = [0u8; 4];
        tls.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"ping");
        tls.write_all(b"pong").await.unwrap();
        tls.flush().await.unwrap();
    });

    // Proxy: validates the SOCKSv5h exchange, then pipes to the backend.
    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_port = proxy_listener.local_addr().unwrap().port();
    let proxy = tokio::spawn(async move {
        let (mut conn, _) = proxy_listener.accept().await.unwrap();

        let mut greeting = [0u8; 3];
        conn.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x01, 0x00]);
        conn.write_all(&[0x05, 0x00]).await.unwrap();

        let mut request = [0u8; 5];
        conn.read_exact(&mut request).await.unwrap();
        assert_eq!(&request[..4], &[0x05, 0x01, 0x00, 0x03]);
        let host_len = request[4] as usize;
        assert_eq!(host_len, "example.test".len());
        let mut host = vec![0u8; host_len];
        conn.read_exact(&mut host).await.unwrap();
        assert_eq!(host, b"example.test");
        let mut port = [0u8; 2];
        conn.read_exact(&mut port).await.unwrap();
        assert_eq!(u16::from_be_bytes(port), 443);

        conn.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x01, 0xBB])
            .await
            .unwrap();

        let mut upstream = TcpStream::connect(backend_addr).await.unwrap();
        let _ = tokio::io::copy_bidirectional(&mut conn, &mut upstream).await;
    });

    let recorder = Arc::new(Recorder::default());
    let emit = Emitter::new(recorder, Verbosity::Quiet);
    let settings = Settings {
        socks5h_port: Some(proxy_port),
        tls_verify_peer: false,
        timeout: Duration::from_secs(5),
        ..Settings::default()
    };

    let mut stream = dial_stream(&settings, &emit, "example.test", 443, true)
        .await
        .expect("tunnelled TLS dial");
    assert!(matches!(stream, NdtStream::Tls(_)));

    stream.write_all(b"ping").await.unwrap();
    stream.flush().await.unwrap();
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"pong");

    backend.await.unwrap();
    // The proxy pipes until both ends hang up.
    drop(stream);
    proxy.await.unwrap();
}
