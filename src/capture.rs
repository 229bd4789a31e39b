use anyhow::{Context, Result, anyhow, bail};
use pcap::{Activated, Capture, Device, Error as PcapError, Linktype};
use tracing::{debug, info, trace, warn};

use crate::dissect::{self, DissectedPacket};
use crate::report;
use crate::stats::Aggregator;

/// BPF filter matching the traffic the profiler dissects.
const CAPTURE_FILTER: &str = "ip";

/// Read timeout for live captures, in milliseconds.
const READ_TIMEOUT_MS: i32 = 1000;

/// Replay a capture file through the aggregator, consuming the entire file.
pub fn replay_file(path: &str, aggregator: &mut Aggregator, snap_len: usize) -> Result<u64> {
    debug!("Opening capture file: {}", path);
    let mut capture = Capture::from_file(path)
        .with_context(|| format!("failed to open capture file: {}", path))?;
    capture
        .filter(CAPTURE_FILTER, true)
        .context("failed to apply capture filter")?;

    drive(&mut capture, aggregator, snap_len, None)
}

/// Capture `count` packets from a live interface through the aggregator.
pub fn capture_live(
    interface: Option<&str>,
    count: u64,
    aggregator: &mut Aggregator,
    snap_len: usize,
) -> Result<u64> {
    let device = match interface {
        Some(name) => Device::from(name),
        None => Device::lookup()
            .context("capture device lookup failed")?
            .ok_or_else(|| anyhow!("no default capture device found"))?,
    };
    info!("Device: {}", device.name);
    info!("Number of packets: {}", count);
    info!("Filter expression: {}", CAPTURE_FILTER);

    let mut capture = Capture::from_device(device)
        .context("failed to open capture device")?
        .snaplen(snap_len as i32)
        .promisc(true)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .context("failed to activate capture device")?;
    // Only Ethernet link layers are handled; other datalink types have
    // different header lengths.
    if capture.get_datalink() != Linktype::ETHERNET {
        bail!("capture device is not an Ethernet interface");
    }
    capture
        .filter(CAPTURE_FILTER, true)
        .context("failed to apply capture filter")?;

    drive(&mut capture, aggregator, snap_len, Some(count))
}

/// Per-frame delivery loop shared by both capture modes. Dissection and
/// aggregation happen inline, one frame at a time; the buffer is never
/// retained past the call.
fn drive<T: Activated>(
    capture: &mut Capture<T>,
    aggregator: &mut Aggregator,
    snap_len: usize,
    limit: Option<u64>,
) -> Result<u64> {
    let mut delivered = 0u64;
    loop {
        if limit.is_some_and(|limit| delivered >= limit) {
            break;
        }
        let packet = match capture.next_packet() {
            Ok(packet) => packet,
            Err(PcapError::NoMorePackets) => break,
            Err(PcapError::TimeoutExpired) => continue,
            Err(e) => {
                warn!("Error reading packet: {}", e);
                continue;
            }
        };
        delivered += 1;

        let caplen = packet.header.caplen as usize;
        let dissected = dissect::dissect(packet.data, caplen, snap_len);
        if tracing::enabled!(tracing::Level::TRACE) {
            if let DissectedPacket::Tcp { payload_offset, payload_len, .. } = dissected {
                // Dump only the bytes actually captured.
                let end = payload_offset
                    .saturating_add(payload_len)
                    .min(caplen)
                    .min(packet.data.len());
                if payload_len > 0 && payload_offset < end {
                    trace!(
                        "payload ({} bytes):\n{}",
                        payload_len,
                        report::format_payload(&packet.data[payload_offset..end])
                    );
                }
            }
        }
        aggregator.record(dissected);

        if delivered % 100_000 == 0 {
            debug!("Processed {} frames", delivered);
        }
    }
    Ok(delivered)
}
