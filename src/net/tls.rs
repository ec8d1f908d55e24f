//! TLS layer for control and measurement connections.
//!
//! Peer verification uses the configured CA bundle, or a short list of
//! platform default locations when none is given. Disabling
//! `tls_verify_peer` swaps in a permissive verifier that accepts any
//! certificate while still checking handshake signatures.

use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::errors::ErrorKind;
use crate::events::Emitter;
use crate::settings::Settings;

/// CA bundle locations probed when no explicit path is configured.
const CA_BUNDLE_CANDIDATES: &[&str] = &[
    "/etc/ssl/cert.pem",
    "/etc/ssl/certs/ca-certificates.crt",
];

/// A permissive server certificate verifier that accepts any presented
/// certificate. Handshake signatures are still verified so the channel
/// integrity holds; only the chain and hostname checks are skipped.
#[derive(Debug)]
struct AcceptAnyServerCert {
    supported_schemes: Vec<SignatureScheme>,
}

impl AcceptAnyServerCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            supported_schemes: provider
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_schemes.clone()
    }
}

/// Pick the CA bundle to load: the configured path, or the first readable
/// platform candidate.
fn find_ca_bundle(settings: &Settings) -> Option<String> {
    if let Some(path) = &settings.ca_bundle_path {
        return Some(path.clone());
    }
    CA_BUNDLE_CANDIDATES
        .iter()
        .find(|path| std::fs::metadata(path).is_ok())
        .map(|path| path.to_string())
}

/// Build the client TLS configuration from the settings.
///
/// With `tls_verify_peer` and no usable CA bundle, this fails with
/// `InvalidArgument` rather than silently downgrading.
pub fn build_client_config(settings: &Settings, emit: &Emitter) -> Result<ClientConfig, ErrorKind> {
    let provider = default_provider();
    if !settings.tls_verify_peer {
        emit.warning("TLS certificate verification is disabled; this is insecure");
        let verifier = Arc::new(AcceptAnyServerCert::new(&provider));
        return Ok(ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|_| ErrorKind::SslGeneric)?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth());
    }

    let bundle_path = find_ca_bundle(settings).ok_or_else(|| {
        emit.warning("no CA bundle configured and none found in default locations");
        ErrorKind::InvalidArgument
    })?;
    let file = std::fs::File::open(&bundle_path).map_err(|e| {
        emit.warning(&format!("cannot open CA bundle {bundle_path}: {e}"));
        ErrorKind::InvalidArgument
    })?;
    let mut reader = BufReader::new(file);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| {
            emit.warning(&format!("cannot parse CA bundle {bundle_path}: {e}"));
            ErrorKind::InvalidArgument
        })?;
        // Tolerate individually unparseable roots, as OpenSSL does.
        let _ = roots.add(cert);
    }
    if roots.is_empty() {
        emit.warning(&format!("CA bundle {bundle_path} contains no usable roots"));
        return Err(ErrorKind::InvalidArgument);
    }
    emit.debug(&format!("loaded CA bundle from {bundle_path}"));

    Ok(ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|_| ErrorKind::SslGeneric)?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Upgrade a connected TCP stream to TLS, verifying `host` via SNI.
pub async fn handshake(
    config: Arc<ClientConfig>,
    host: &str,
    stream: TcpStream,
    timeout: Duration,
    emit: &Emitter,
) -> Result<TlsStream<TcpStream>, ErrorKind> {
    let domain = ServerName::try_from(host.to_string()).map_err(|_| {
        emit.warning(&format!("invalid TLS server name: {host}"));
        ErrorKind::InvalidArgument
    })?;
    let connector = TlsConnector::from(config);
    match tokio::time::timeout(timeout, connector.connect(domain, stream)).await {
        Ok(Ok(tls)) => {
            emit.debug(&format!("TLS handshake with {host} complete"));
            Ok(tls)
        }
        Ok(Err(e)) => {
            emit.warning(&format!("TLS handshake with {host} failed: {e}"));
            Err(ErrorKind::SslGeneric)
        }
        Err(_) => Err(ErrorKind::TimedOut),
    }
}
