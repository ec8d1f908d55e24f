//! ndt7 measurement messages (client-originated, JSON over WebSocket
//! text frames).

use serde::{Deserialize, Serialize};

/// Application-level progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Microseconds since the subtest began.
    #[serde(rename = "ElapsedTime")]
    pub elapsed_time: i64,
    #[serde(rename = "NumBytes")]
    pub num_bytes: i64,
}

/// Kernel TCP statistics snapshot, in the wire naming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpInfo {
    #[serde(rename = "ElapsedTime")]
    pub elapsed_time: i64,
    #[serde(rename = "TcpiState")]
    pub state: i64,
    #[serde(rename = "TcpiCaState")]
    pub ca_state: i64,
    #[serde(rename = "TcpiRetransmits")]
    pub retransmits: i64,
    #[serde(rename = "TcpiRto")]
    pub rto: i64,
    #[serde(rename = "TcpiAto")]
    pub ato: i64,
    #[serde(rename = "TcpiSndMss")]
    pub snd_mss: i64,
    #[serde(rename = "TcpiRcvMss")]
    pub rcv_mss: i64,
    #[serde(rename = "TcpiRtt")]
    pub rtt: i64,
    #[serde(rename = "TcpiRttvar")]
    pub rttvar: i64,
    #[serde(rename = "TcpiSndSsthresh")]
    pub snd_ssthresh: i64,
    #[serde(rename = "TcpiSndCwnd")]
    pub snd_cwnd: i64,
    #[serde(rename = "TcpiAdvmss")]
    pub advmss: i64,
    #[serde(rename = "TcpiReordering")]
    pub reordering: i64,
    #[serde(rename = "TcpiTotalRetrans")]
    pub total_retrans: i64,
    #[serde(rename = "TcpiBytesAcked")]
    pub bytes_acked: i64,
    #[serde(rename = "TcpiBytesReceived")]
    pub bytes_received: i64,
    #[serde(rename = "TcpiSegsOut")]
    pub segs_out: i64,
    #[serde(rename = "TcpiSegsIn")]
    pub segs_in: i64,
    #[serde(rename = "TcpiMinRtt")]
    pub min_rtt: i64,
    #[serde(rename = "TcpiDeliveryRate")]
    pub delivery_rate: i64,
    #[serde(rename = "TcpiBytesSent")]
    pub bytes_sent: i64,
    #[serde(rename = "TcpiBytesRetrans")]
    pub bytes_retrans: i64,
}

/// One measurement message. The TCPInfo subobject is present only when
/// the platform exposes kernel statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "AppInfo", skip_serializing_if = "Option::is_none")]
    pub app_info: Option<AppInfo>,
    #[serde(rename = "TCPInfo", skip_serializing_if = "Option::is_none")]
    pub tcp_info: Option<TcpInfo>,
}
