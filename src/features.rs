use crate::stats::{HistogramSet, PORT_BINS, PROTOCOL_SLOTS, SIZE_BINS};

/// Dimensions per vector: total frames, protocol counts, destination-port
/// bins, size bins.
pub const FEATURE_DIMS: usize = 1 + PROTOCOL_SLOTS + PORT_BINS + SIZE_BINS;

/// Fixed-length numeric summary of one source-octet entity. Built fresh per
/// clustering run, never mutated afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Most significant byte of the source addresses this vector summarizes.
    pub octet: u8,
    pub values: Vec<f64>,
}

/// Project the session histograms into one feature vector per populated
/// source-octet bucket, in ascending octet order. The output order is the
/// index space cluster assignments are reported against.
pub fn build_vectors(histograms: &HistogramSet) -> Vec<FeatureVector> {
    histograms
        .src_ip_octet
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count > 0)
        .map(|(octet, _)| {
            let profile = &histograms.src_octet_profiles[octet];
            let mut values = Vec::with_capacity(FEATURE_DIMS);
            values.push(profile.frames as f64);
            values.extend(profile.protocol.iter().map(|&c| c as f64));
            values.extend(profile.dst_port_bins.iter().map(|&c| c as f64));
            values.extend(profile.size_bins.iter().map(|&c| c as f64));
            FeatureVector {
                octet: octet as u8,
                values,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::{DEFAULT_SNAP_LEN, build_tcp_frame, dissect};
    use crate::stats::Aggregator;

    fn session_with_sources(octets: &[u8]) -> Aggregator {
        let mut aggregator = Aggregator::new(DEFAULT_SNAP_LEN);
        for &octet in octets {
            let frame = build_tcp_frame([octet, 0, 0, 1], [10, 0, 0, 2], 1, 80, 0, &[]);
            aggregator.record(dissect(&frame, frame.len(), DEFAULT_SNAP_LEN));
        }
        aggregator
    }

    #[test]
    fn test_one_vector_per_populated_octet() {
        let aggregator = session_with_sources(&[10, 10, 172, 192]);
        let vectors = build_vectors(aggregator.histograms());
        assert_eq!(vectors.len(), 3);
    }

    #[test]
    fn test_output_order_is_ascending_octet() {
        let aggregator = session_with_sources(&[192, 10, 172]);
        let vectors = build_vectors(aggregator.histograms());
        let octets: Vec<u8> = vectors.iter().map(|v| v.octet).collect();
        assert_eq!(octets, vec![10, 172, 192]);
    }

    #[test]
    fn test_fixed_dimension_count() {
        let aggregator = session_with_sources(&[10, 172]);
        for vector in build_vectors(aggregator.histograms()) {
            assert_eq!(vector.values.len(), FEATURE_DIMS);
        }
    }

    #[test]
    fn test_frame_counts_carried_into_vectors() {
        let aggregator = session_with_sources(&[10, 10, 10, 172]);
        let vectors = build_vectors(aggregator.histograms());
        assert_eq!(vectors[0].octet, 10);
        assert_eq!(vectors[0].values[0], 3.0);
        assert_eq!(vectors[1].values[0], 1.0);
    }

    #[test]
    fn test_empty_session_builds_no_vectors() {
        let aggregator = Aggregator::new(DEFAULT_SNAP_LEN);
        assert!(build_vectors(aggregator.histograms()).is_empty());
    }
}
