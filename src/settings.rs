//! Client settings: subtest selection, protocol features, endpoints,
//! timeouts, and server-side metadata.

use std::collections::BTreeMap;
use std::time::Duration;

/// Version string advertised in the ndt5 login message.
pub const NDT_VERSION_COMPAT: &str = "v3.7.0";

/// Default clear-text ndt5 control port.
pub const DEFAULT_PORT: u16 = 3001;
/// Default ndt5-over-TLS control port.
pub const DEFAULT_TLS_PORT: u16 = 3010;
/// Default ndt7 (TLS + WebSocket) port.
pub const DEFAULT_NDT7_PORT: u16 = 443;

// ---------------------------------------------------------------------------
// Subtest flags
// ---------------------------------------------------------------------------

/// Bitset selecting which subtests to request from the server.
///
/// The bit values are wire-visible: the login message carries this byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NettestFlags(pub u8);

impl NettestFlags {
    pub const MIDDLEBOX: NettestFlags = NettestFlags(1 << 0);
    pub const UPLOAD: NettestFlags = NettestFlags(1 << 1);
    pub const DOWNLOAD: NettestFlags = NettestFlags(1 << 2);
    pub const SIMPLE_FIREWALL: NettestFlags = NettestFlags(1 << 3);
    pub const STATUS: NettestFlags = NettestFlags(1 << 4);
    pub const META: NettestFlags = NettestFlags(1 << 5);
    pub const UPLOAD_EXT: NettestFlags = NettestFlags(1 << 6);
    pub const DOWNLOAD_EXT: NettestFlags = NettestFlags(1 << 7);

    pub fn contains(self, other: NettestFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: NettestFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: NettestFlags) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Protocol flags
// ---------------------------------------------------------------------------

/// Bitset selecting protocol features layered over the base ndt5 exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolFlags(pub u32);

impl ProtocolFlags {
    /// Wrap every ndt5 message body in a `{"msg": ...}` JSON envelope.
    pub const JSON: ProtocolFlags = ProtocolFlags(1 << 0);
    /// Use TLS for the control and measurement connections.
    pub const TLS: ProtocolFlags = ProtocolFlags(1 << 1);
    /// Encapsulate ndt5 messages in WebSocket frames.
    pub const WEBSOCKET: ProtocolFlags = ProtocolFlags(1 << 2);
    /// Speak ndt7 instead of ndt5. Implies TLS and WebSocket.
    pub const NDT7: ProtocolFlags = ProtocolFlags(1 << 3);

    pub fn contains(self, other: ProtocolFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ProtocolFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ProtocolFlags) {
        self.0 &= !other.0;
    }
}

// ---------------------------------------------------------------------------
// Discovery policy and verbosity
// ---------------------------------------------------------------------------

/// Server-selection policy for the locate service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MlabnsPolicy {
    /// Ask for the single closest server.
    Closest,
    /// Ask for a random server.
    Random,
    /// Ask for a list of nearby servers and try each in turn.
    #[default]
    GeoOptions,
}

/// Logging verbosity gate applied before invoking the event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Warning,
    Info,
    Debug,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Immutable configuration for a single `run()`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the locate service, without a trailing slash. Unused
    /// when `hostname` is set.
    pub mlabns_base_url: String,
    /// Locate-service policy.
    pub mlabns_policy: MlabnsPolicy,
    /// Per-operation I/O timeout.
    pub timeout: Duration,
    /// NDT server to use. Empty means "discover one".
    pub hostname: String,
    /// Port override. `None` picks the protocol default.
    pub port: Option<u16>,
    /// Subtests to request.
    pub nettest_flags: NettestFlags,
    /// Verbosity of the emitted log events.
    pub verbosity: Verbosity,
    /// Metadata sent to the server during the meta subtest.
    pub metadata: BTreeMap<String, String>,
    /// Protocol feature selection.
    pub protocol_flags: ProtocolFlags,
    /// Wall-clock cap on a single subtest.
    pub max_runtime: Duration,
    /// SOCKSv5h proxy port on 127.0.0.1. `None` disables tunnelling.
    pub socks5h_port: Option<u16>,
    /// CA bundle override. `None` probes the platform defaults.
    pub ca_bundle_path: Option<String>,
    /// Verify the server certificate and hostname. Disabling this is
    /// insecure and only meant for testing.
    pub tls_verify_peer: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("client.version".to_string(), NDT_VERSION_COMPAT.to_string());
        metadata.insert(
            "client.application".to_string(),
            concat!("ndt-client/", env!("CARGO_PKG_VERSION")).to_string(),
        );
        Self {
            mlabns_base_url: "https://locate.measurementlab.net".to_string(),
            mlabns_policy: MlabnsPolicy::default(),
            timeout: Duration::from_secs(7),
            hostname: String::new(),
            port: None,
            nettest_flags: NettestFlags::DOWNLOAD,
            verbosity: Verbosity::Quiet,
            metadata,
            protocol_flags: ProtocolFlags::default(),
            max_runtime: Duration::from_secs(14),
            socks5h_port: None,
            ca_bundle_path: None,
            tls_verify_peer: true,
        }
    }
}

impl Settings {
    /// Apply the protocol-flag implications once, at the start of a run.
    ///
    /// `ndt7` implies `tls|websocket`; the multi-stream download requires
    /// the JSON protocol and is incompatible with TLS and WebSocket
    /// framing.
    pub fn normalize(&mut self) {
        if self.protocol_flags.contains(ProtocolFlags::NDT7) {
            self.protocol_flags.insert(ProtocolFlags::TLS);
            self.protocol_flags.insert(ProtocolFlags::WEBSOCKET);
        }
        if self.nettest_flags.contains(NettestFlags::DOWNLOAD_EXT) {
            self.protocol_flags.insert(ProtocolFlags::JSON);
            self.protocol_flags.remove(ProtocolFlags::TLS);
            self.protocol_flags.remove(ProtocolFlags::WEBSOCKET);
        }
    }

    /// The control port to dial: the explicit override or the protocol
    /// default (3001 clear text, 3010 TLS, 443 ndt7).
    pub fn control_port(&self) -> u16 {
        if let Some(port) = self.port {
            return port;
        }
        if self.protocol_flags.contains(ProtocolFlags::NDT7) {
            DEFAULT_NDT7_PORT
        } else if self.protocol_flags.contains(ProtocolFlags::TLS) {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nettest_flag_bits_match_wire_values() {
        assert_eq!(NettestFlags::MIDDLEBOX.bits(), 0x01);
        assert_eq!(NettestFlags::UPLOAD.bits(), 0x02);
        assert_eq!(NettestFlags::DOWNLOAD.bits(), 0x04);
        assert_eq!(NettestFlags::SIMPLE_FIREWALL.bits(), 0x08);
        assert_eq!(NettestFlags::STATUS.bits(), 0x10);
        assert_eq!(NettestFlags::META.bits(), 0x20);
        assert_eq!(NettestFlags::UPLOAD_EXT.bits(), 0x40);
        assert_eq!(NettestFlags::DOWNLOAD_EXT.bits(), 0x80);
    }

    #[test]
    fn ndt7_implies_tls_and_websocket() {
        let mut settings = Settings {
            protocol_flags: ProtocolFlags::NDT7,
            ..Settings::default()
        };
        settings.normalize();
        assert!(settings.protocol_flags.contains(ProtocolFlags::TLS));
        assert!(settings.protocol_flags.contains(ProtocolFlags::WEBSOCKET));
    }

    #[test]
    fn download_ext_forces_json_and_drops_tls_websocket() {
        let mut settings = Settings {
            nettest_flags: NettestFlags::DOWNLOAD_EXT,
            protocol_flags: ProtocolFlags(ProtocolFlags::TLS.0 | ProtocolFlags::WEBSOCKET.0),
            ..Settings::default()
        };
        settings.normalize();
        assert!(settings.protocol_flags.contains(ProtocolFlags::JSON));
        assert!(!settings.protocol_flags.contains(ProtocolFlags::TLS));
        assert!(!settings.protocol_flags.contains(ProtocolFlags::WEBSOCKET));
    }

    #[test]
    fn default_ports_follow_protocol() {
        let mut settings = Settings::default();
        assert_eq!(settings.control_port(), DEFAULT_PORT);
        settings.protocol_flags.insert(ProtocolFlags::TLS);
        assert_eq!(settings.control_port(), DEFAULT_TLS_PORT);
        settings.protocol_flags.insert(ProtocolFlags::NDT7);
        assert_eq!(settings.control_port(), DEFAULT_NDT7_PORT);
        settings.port = Some(8080);
        assert_eq!(settings.control_port(), 8080);
    }

    #[test]
    fn default_metadata_identifies_client() {
        let settings = Settings::default();
        assert_eq!(
            settings.metadata.get("client.version").map(String::as_str),
            Some(NDT_VERSION_COMPAT)
        );
        assert!(settings.metadata.contains_key("client.application"));
    }
}
