use std::fs::File;
use std::io::BufWriter;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::dissect::{TH_ACK, TH_CWR, TH_ECE, TH_FIN, TH_PUSH, TH_RST, TH_SYN, TH_URG};
use crate::features::FeatureVector;
use crate::kmeans::ClusterAssignment;
use crate::stats::{FrameCounters, HistogramSet};

const FLAG_NAMES: [(u8, &str); 8] = [
    (TH_FIN, "FIN"),
    (TH_SYN, "SYN"),
    (TH_RST, "RST"),
    (TH_PUSH, "PUSH"),
    (TH_ACK, "ACK"),
    (TH_URG, "URG"),
    (TH_ECE, "ECE"),
    (TH_CWR, "CWR"),
];

/// Cluster labels joined back to their source-octet entities.
#[derive(Debug, Serialize)]
pub struct ClusterReport {
    pub k: usize,
    pub iterations: usize,
    pub converged: bool,
    pub entities: Vec<EntityCluster>,
}

#[derive(Debug, Serialize)]
pub struct EntityCluster {
    pub octet: u8,
    pub cluster: usize,
}

impl ClusterReport {
    pub fn new(vectors: &[FeatureVector], assignment: &ClusterAssignment, k: usize) -> Self {
        let entities = vectors
            .iter()
            .zip(assignment.assignments.iter())
            .map(|(vector, &cluster)| EntityCluster {
                octet: vector.octet,
                cluster,
            })
            .collect();
        Self {
            k,
            iterations: assignment.iterations,
            converged: assignment.converged,
            entities,
        }
    }
}

/// Read-only snapshot of a completed session, exported as JSON on request.
#[derive(Debug, Serialize)]
pub struct SessionReport<'a> {
    pub frames: &'a FrameCounters,
    pub histograms: &'a HistogramSet,
    pub clusters: Option<&'a ClusterReport>,
}

/// Render the populated histogram buckets, the per-frame event counters and
/// the cluster labels to stdout.
pub fn print_report(
    histograms: &HistogramSet,
    counters: &FrameCounters,
    clusters: Option<&ClusterReport>,
) {
    println!(
        "Frames: {} seen, {} recorded, {} malformed, {} oversized",
        counters.frames_seen,
        counters.recorded,
        counters.malformed_total(),
        counters.oversized
    );

    print_counts("saddr", &histograms.src_ip_octet);
    print_counts("daddr", &histograms.dst_ip_octet);
    print_counts("sport", &histograms.src_port);
    print_counts("dport", &histograms.dst_port);

    for (name, count) in ["tcp", "udp", "icmp", "ip"].iter().zip(histograms.protocol.iter()) {
        println!("protocol: {}\t count: {}", name, count);
    }

    print_counts("packet size", &histograms.packet_size);

    for (value, &count) in nonzero(&histograms.tcp_flags) {
        println!(
            "tcp flags: 0x{:02x} ({})\t count: {}",
            value,
            flags_label(value as u8),
            count
        );
    }

    if let Some(report) = clusters {
        println!(
            "Clusters: k={}, {} iterations{}",
            report.k,
            report.iterations,
            if report.converged { "" } else { " (not converged)" }
        );
        for entity in &report.entities {
            println!("saddr octet: {}\t cluster: {}", entity.octet, entity.cluster);
        }
    }
}

/// Write the session report to `path` as pretty-printed JSON.
pub fn write_json(path: &str, session: &SessionReport<'_>) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create report file: {}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), session)
        .context("failed to serialize session report")?;
    Ok(())
}

/// Render payload bytes in rows of 16: offset, hex, printable ASCII.
pub fn format_payload(payload: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in payload.chunks(16).enumerate() {
        out.push_str(&format!("{:05}   ", row * 16));
        for (i, byte) in chunk.iter().enumerate() {
            out.push_str(&format!("{:02x} ", byte));
            if i == 7 {
                out.push(' ');
            }
        }
        for i in chunk.len()..16 {
            out.push_str("   ");
            if i == 7 {
                out.push(' ');
            }
        }
        out.push_str("   ");
        for &byte in chunk {
            out.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}

fn nonzero(counts: &[u64]) -> impl Iterator<Item = (usize, &u64)> {
    counts.iter().enumerate().filter(|&(_, &count)| count > 0)
}

fn print_counts(label: &str, counts: &[u64]) {
    for (value, &count) in nonzero(counts) {
        println!("{}: {}\t count: {}", label, value, count);
    }
}

fn flags_label(flags: u8) -> String {
    if flags == 0 {
        return "none".to_string();
    }
    FLAG_NAMES
        .iter()
        .filter(|&&(bit, _)| flags & bit != 0)
        .map(|&(_, name)| name)
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vectors() -> Vec<FeatureVector> {
        vec![
            FeatureVector { octet: 10, values: vec![1.0, 2.0] },
            FeatureVector { octet: 172, values: vec![3.0, 4.0] },
        ]
    }

    #[test]
    fn test_cluster_report_pairs_octets_with_labels() {
        let assignment = ClusterAssignment {
            assignments: vec![0, 1],
            iterations: 2,
            converged: true,
        };
        let report = ClusterReport::new(&sample_vectors(), &assignment, 2);
        assert_eq!(report.entities.len(), 2);
        assert_eq!(report.entities[0].octet, 10);
        assert_eq!(report.entities[0].cluster, 0);
        assert_eq!(report.entities[1].octet, 172);
        assert_eq!(report.entities[1].cluster, 1);
    }

    #[test]
    fn test_session_report_serializes() {
        let histograms = HistogramSet::new(64);
        let counters = FrameCounters::default();
        let session = SessionReport {
            frames: &counters,
            histograms: &histograms,
            clusters: None,
        };
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("frames").is_some());
        assert!(value.get("histograms").is_some());
        assert_eq!(value["histograms"]["snap_len"], 64);
    }

    #[test]
    fn test_flags_label() {
        assert_eq!(flags_label(0), "none");
        assert_eq!(flags_label(TH_SYN), "SYN");
        assert_eq!(flags_label(TH_SYN | TH_ACK), "SYN|ACK");
    }

    #[test]
    fn test_format_payload_rows() {
        let payload: Vec<u8> = (0u8..20).chain(*b"GET ").collect();
        let dump = format_payload(&payload);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000   00 01 02"));
        assert!(lines[1].starts_with("00016   "));
        // Non-printable bytes render as dots, printable ones as themselves.
        assert!(lines[0].ends_with("................"));
        assert!(lines[1].contains("GET "));
    }
}
