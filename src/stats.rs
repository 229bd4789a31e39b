use serde::Serialize;
use tracing::{debug, warn};

use crate::dissect::{DissectedPacket, IpHeader, MalformedReason, ProtocolKind, SIZE_ETHERNET};

pub const ADDR_BUCKETS: usize = 256;
pub const TRACKED_PORTS: usize = 1024;
pub const PROTOCOL_SLOTS: usize = 4;
pub const FLAG_BUCKETS: usize = 256;

/// Coarse bins used by the per-octet profiles that feed feature vectors.
pub const PORT_BINS: usize = 8;
pub const SIZE_BINS: usize = 8;

/// Histogram slots for the protocol counter.
pub const PROTO_TCP: usize = 0;
pub const PROTO_UDP: usize = 1;
pub const PROTO_ICMP: usize = 2;
pub const PROTO_IP: usize = 3;

/// Behavior profile of one source-address octet, the entity the feature
/// vector builder emits one vector per.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OctetProfile {
    pub frames: u64,
    pub protocol: [u64; PROTOCOL_SLOTS],
    pub dst_port_bins: [u64; PORT_BINS],
    pub size_bins: [u64; SIZE_BINS],
}

/// Bounded counter arrays accumulated over one capture session.
///
/// Sized at construction and never resized: address octets 256, tracked
/// ports 1024, protocols 4, sizes `[0, snap_len)`, flag combinations 256.
/// The aggregator is the sole writer; reporting reads a snapshot only after
/// the session completes.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSet {
    pub snap_len: usize,
    pub src_ip_octet: Vec<u64>,
    pub dst_ip_octet: Vec<u64>,
    pub src_port: Vec<u64>,
    pub dst_port: Vec<u64>,
    pub protocol: [u64; PROTOCOL_SLOTS],
    pub packet_size: Vec<u64>,
    pub tcp_flags: Vec<u64>,
    pub src_octet_profiles: Vec<OctetProfile>,
}

impl HistogramSet {
    pub fn new(snap_len: usize) -> Self {
        Self {
            snap_len,
            src_ip_octet: vec![0; ADDR_BUCKETS],
            dst_ip_octet: vec![0; ADDR_BUCKETS],
            src_port: vec![0; TRACKED_PORTS],
            dst_port: vec![0; TRACKED_PORTS],
            protocol: [0; PROTOCOL_SLOTS],
            packet_size: vec![0; snap_len],
            tcp_flags: vec![0; FLAG_BUCKETS],
            src_octet_profiles: vec![OctetProfile::default(); ADDR_BUCKETS],
        }
    }

    /// Element-wise addition, for merging per-worker partial histograms.
    pub fn merge(&mut self, other: &HistogramSet) {
        assert_eq!(self.snap_len, other.snap_len, "snap length mismatch in merge");
        add_counts(&mut self.src_ip_octet, &other.src_ip_octet);
        add_counts(&mut self.dst_ip_octet, &other.dst_ip_octet);
        add_counts(&mut self.src_port, &other.src_port);
        add_counts(&mut self.dst_port, &other.dst_port);
        for (slot, count) in self.protocol.iter_mut().zip(other.protocol.iter()) {
            *slot += count;
        }
        add_counts(&mut self.packet_size, &other.packet_size);
        add_counts(&mut self.tcp_flags, &other.tcp_flags);
        for (profile, theirs) in self
            .src_octet_profiles
            .iter_mut()
            .zip(other.src_octet_profiles.iter())
        {
            profile.frames += theirs.frames;
            for (slot, count) in profile.protocol.iter_mut().zip(theirs.protocol.iter()) {
                *slot += count;
            }
            for (bin, count) in profile.dst_port_bins.iter_mut().zip(theirs.dst_port_bins.iter()) {
                *bin += count;
            }
            for (bin, count) in profile.size_bins.iter_mut().zip(theirs.size_bins.iter()) {
                *bin += count;
            }
        }
    }
}

fn add_counts(into: &mut [u64], from: &[u64]) {
    for (slot, count) in into.iter_mut().zip(from.iter()) {
        *slot += count;
    }
}

fn size_bin(size: usize, snap_len: usize) -> usize {
    (size * SIZE_BINS / snap_len).min(SIZE_BINS - 1)
}

/// Per-frame event counts for the session. Every skipped or excluded frame
/// is individually accounted for here.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FrameCounters {
    pub frames_seen: u64,
    pub recorded: u64,
    pub malformed_truncated: u64,
    pub malformed_not_ipv4: u64,
    pub malformed_ip_header: u64,
    pub malformed_tcp_header: u64,
    pub oversized: u64,
}

impl FrameCounters {
    pub fn malformed_total(&self) -> u64 {
        self.malformed_truncated
            + self.malformed_not_ipv4
            + self.malformed_ip_header
            + self.malformed_tcp_header
    }
}

/// Single writer of the session's `HistogramSet`. Consumes one dissected
/// packet per captured frame.
pub struct Aggregator {
    histograms: HistogramSet,
    counters: FrameCounters,
}

impl Aggregator {
    pub fn new(snap_len: usize) -> Self {
        Self {
            histograms: HistogramSet::new(snap_len),
            counters: FrameCounters::default(),
        }
    }

    pub fn histograms(&self) -> &HistogramSet {
        &self.histograms
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    pub fn record(&mut self, packet: DissectedPacket) {
        self.counters.frames_seen += 1;
        match packet {
            DissectedPacket::Malformed { reason } => {
                debug!("skipping frame: {}", reason);
                match reason {
                    MalformedReason::Truncated { .. } => self.counters.malformed_truncated += 1,
                    MalformedReason::NotIpv4 { .. } | MalformedReason::IpVersion { .. } => {
                        self.counters.malformed_not_ipv4 += 1
                    }
                    MalformedReason::IpHeaderLength { .. } => {
                        self.counters.malformed_ip_header += 1
                    }
                    MalformedReason::TcpHeaderLength { .. } => {
                        self.counters.malformed_tcp_header += 1
                    }
                }
            }
            DissectedPacket::OtherIp { ip, kind } => {
                self.counters.recorded += 1;
                self.record_addresses(&ip, kind);
                // Non-TCP frames contribute their observable header-only
                // size.
                self.record_size(ip.src_octet(), SIZE_ETHERNET + ip.header_len);
            }
            DissectedPacket::Tcp {
                ip,
                tcp,
                payload_len,
                oversized,
                ..
            } => {
                self.counters.recorded += 1;
                self.record_addresses(&ip, ProtocolKind::Tcp);
                self.histograms.tcp_flags[tcp.flags as usize] += 1;
                // Ports at or above 1024 are not tracked; the bound keeps
                // the histogram cardinality fixed.
                if (tcp.src_port as usize) < TRACKED_PORTS {
                    self.histograms.src_port[tcp.src_port as usize] += 1;
                }
                if (tcp.dst_port as usize) < TRACKED_PORTS {
                    self.histograms.dst_port[tcp.dst_port as usize] += 1;
                    let profile =
                        &mut self.histograms.src_octet_profiles[ip.src_octet() as usize];
                    profile.dst_port_bins[tcp.dst_port as usize * PORT_BINS / TRACKED_PORTS] += 1;
                }
                if oversized {
                    self.counters.oversized += 1;
                    warn!(
                        "oversized packet: {} bytes claimed from {}",
                        SIZE_ETHERNET + ip.header_len + payload_len,
                        ip.src_octet()
                    );
                } else {
                    self.record_size(ip.src_octet(), payload_len);
                }
            }
        }
    }

    fn record_addresses(&mut self, ip: &IpHeader, kind: ProtocolKind) {
        let slot = match kind {
            ProtocolKind::Tcp => PROTO_TCP,
            ProtocolKind::Udp => PROTO_UDP,
            ProtocolKind::Icmp => PROTO_ICMP,
            // IP-in-IP and unrecognized protocols share the catch-all slot.
            ProtocolKind::IpInIp | ProtocolKind::Other(_) => PROTO_IP,
        };
        self.histograms.src_ip_octet[ip.src_octet() as usize] += 1;
        self.histograms.dst_ip_octet[ip.dst_octet() as usize] += 1;
        self.histograms.protocol[slot] += 1;

        let profile = &mut self.histograms.src_octet_profiles[ip.src_octet() as usize];
        profile.frames += 1;
        profile.protocol[slot] += 1;
    }

    fn record_size(&mut self, src_octet: u8, size: usize) {
        if size < self.histograms.snap_len {
            self.histograms.packet_size[size] += 1;
            let snap_len = self.histograms.snap_len;
            let profile = &mut self.histograms.src_octet_profiles[src_octet as usize];
            profile.size_bins[size_bin(size, snap_len)] += 1;
        } else {
            // Only reachable with a snap length smaller than the maximum
            // header size; counted with the oversized frames.
            self.counters.oversized += 1;
        }
    }
}
