//! Kernel TCP statistics for the upload measurement messages.
//!
//! On Linux this reads `TCP_INFO` straight off the measurement socket.
//! The struct mirrors the kernel layout through `tcpi_reord_seen`; older
//! kernels reply with a shorter struct and the zero-initialized tail
//! keeps the unmapped fields at zero.

#[cfg(target_os = "linux")]
pub use linux::wire_snapshot;

#[cfg(not(target_os = "linux"))]
pub fn wire_snapshot(_fd: i32, _elapsed_us: i64) -> Option<crate::ndt7::measurement::TcpInfo> {
    None
}

#[cfg(target_os = "linux")]
mod linux {
    use std::mem;
    use std::os::fd::RawFd;

    use crate::ndt7::measurement::TcpInfo;

    /// `struct tcp_info` from the Linux UAPI, in declaration order.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    struct RawTcpInfo {
        state: u8,
        ca_state: u8,
        retransmits: u8,
        probes: u8,
        backoff: u8,
        options: u8,
        wscale: u8,
        app_limited: u8,
        rto: u32,
        ato: u32,
        snd_mss: u32,
        rcv_mss: u32,
        unacked: u32,
        sacked: u32,
        lost: u32,
        retrans: u32,
        fackets: u32,
        last_data_sent: u32,
        last_ack_sent: u32,
        last_data_recv: u32,
        last_ack_recv: u32,
        pmtu: u32,
        rcv_ssthresh: u32,
        rtt: u32,
        rttvar: u32,
        snd_ssthresh: u32,
        snd_cwnd: u32,
        advmss: u32,
        reordering: u32,
        rcv_rtt: u32,
        rcv_space: u32,
        total_retrans: u32,
        pacing_rate: u64,
        max_pacing_rate: u64,
        bytes_acked: u64,
        bytes_received: u64,
        segs_out: u32,
        segs_in: u32,
        notsent_bytes: u32,
        min_rtt: u32,
        data_segs_in: u32,
        data_segs_out: u32,
        delivery_rate: u64,
        busy_time: u64,
        rwnd_limited: u64,
        sndbuf_limited: u64,
        delivered: u32,
        delivered_ce: u32,
        bytes_sent: u64,
        bytes_retrans: u64,
        dsack_dups: u32,
        reord_seen: u32,
    }

    fn read_raw(fd: RawFd) -> Option<RawTcpInfo> {
        let mut info = RawTcpInfo::default();
        let mut len = mem::size_of::<RawTcpInfo>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                &mut info as *mut RawTcpInfo as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return None;
        }
        Some(info)
    }

    /// Snapshot the socket's TCP statistics in the wire (JSON) shape.
    pub fn wire_snapshot(fd: RawFd, elapsed_us: i64) -> Option<TcpInfo> {
        let raw = read_raw(fd)?;
        Some(TcpInfo {
            elapsed_time: elapsed_us,
            state: raw.state as i64,
            ca_state: raw.ca_state as i64,
            retransmits: raw.retransmits as i64,
            rto: raw.rto as i64,
            ato: raw.ato as i64,
            snd_mss: raw.snd_mss as i64,
            rcv_mss: raw.rcv_mss as i64,
            rtt: raw.rtt as i64,
            rttvar: raw.rttvar as i64,
            snd_ssthresh: raw.snd_ssthresh as i64,
            snd_cwnd: raw.snd_cwnd as i64,
            advmss: raw.advmss as i64,
            reordering: raw.reordering as i64,
            total_retrans: raw.total_retrans as i64,
            bytes_acked: raw.bytes_acked as i64,
            bytes_received: raw.bytes_received as i64,
            segs_out: raw.segs_out as i64,
            segs_in: raw.segs_in as i64,
            min_rtt: raw.min_rtt as i64,
            delivery_rate: raw.delivery_rate as i64,
            bytes_sent: raw.bytes_sent as i64,
            bytes_retrans: raw.bytes_retrans as i64,
        })
    }

}
