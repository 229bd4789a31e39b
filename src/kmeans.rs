use tracing::{debug, warn};

use crate::distance::normalized_euclidean;
use crate::error::{ProfilerError, Result};
use crate::features::FeatureVector;

pub const DEFAULT_MAX_ITERATIONS: usize = 32;

/// Mapping from feature-vector index to cluster id in `[0, k)`, produced by
/// one clustering run.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub assignments: Vec<usize>,
    pub iterations: usize,
    /// False when the iteration bound was hit before membership stabilized.
    /// The last assignment is still valid.
    pub converged: bool,
}

/// Partition the feature vectors into `k` clusters.
///
/// Centroids are seeded from the first `k` vectors: deterministic, so runs
/// over the same capture reproduce the same labels. Each pass assigns every
/// vector to its minimum-distance centroid (ties go to the lowest centroid
/// index), then recenters each cluster on the element-wise mean of its
/// members; a cluster left without members keeps its previous centroid.
/// Iterates until no vector changes cluster, or `max_iterations` passes.
pub fn cluster(
    vectors: &[FeatureVector],
    k: usize,
    max_iterations: usize,
) -> Result<ClusterAssignment> {
    if k == 0 || vectors.len() < k {
        return Err(ProfilerError::InsufficientSamples {
            needed: k.max(1),
            got: vectors.len(),
        });
    }

    let dims = vectors[0].values.len();
    let mut centroids: Vec<Vec<f64>> = vectors[..k].iter().map(|v| v.values.clone()).collect();
    let mut assignments = vec![0usize; vectors.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;

        // Assignment step
        let mut changed = false;
        for (index, vector) in vectors.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (cluster, centroid) in centroids.iter().enumerate() {
                let dist = normalized_euclidean(&vector.values, centroid)?;
                if dist < best_dist {
                    best_dist = dist;
                    best = cluster;
                }
            }
            if assignments[index] != best {
                assignments[index] = best;
                changed = true;
            }
        }
        // The first pass establishes the baseline; convergence is judged
        // between consecutive passes.
        if iterations > 1 && !changed {
            converged = true;
            break;
        }

        // Recompute step
        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&FeatureVector> = vectors
                .iter()
                .zip(assignments.iter())
                .filter(|&(_, &assigned)| assigned == cluster)
                .map(|(vector, _)| vector)
                .collect();
            if members.is_empty() {
                continue;
            }
            for dim in 0..dims {
                centroid[dim] = members.iter().map(|v| v.values[dim]).sum::<f64>()
                    / members.len() as f64;
            }
        }
    }

    if converged {
        debug!("k-means converged after {} iterations", iterations);
    } else {
        warn!(
            "k-means did not converge within {} iterations; using last assignment",
            max_iterations
        );
    }

    Ok(ClusterAssignment {
        assignments,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors_from(rows: &[&[f64]]) -> Vec<FeatureVector> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| FeatureVector {
                octet: i as u8,
                values: row.to_vec(),
            })
            .collect()
    }

    #[test]
    fn test_insufficient_samples() {
        let vectors = vectors_from(&[&[1.0, 2.0], &[3.0, 4.0]]);
        assert!(matches!(
            cluster(&vectors, 3, DEFAULT_MAX_ITERATIONS),
            Err(ProfilerError::InsufficientSamples { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn test_zero_clusters_rejected() {
        let vectors = vectors_from(&[&[1.0]]);
        assert!(matches!(
            cluster(&vectors, 0, DEFAULT_MAX_ITERATIONS),
            Err(ProfilerError::InsufficientSamples { needed: 1, .. })
        ));
    }

    #[test]
    fn test_two_well_separated_groups() {
        let vectors = vectors_from(&[
            &[0.0, 0.0],
            &[0.0, 1.0],
            &[10.0, 10.0],
            &[10.0, 11.0],
        ]);
        let result = cluster(&vectors, 2, DEFAULT_MAX_ITERATIONS).unwrap();

        assert!(result.converged);
        assert_eq!(result.assignments.len(), 4);
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[2], result.assignments[3]);
        assert_ne!(result.assignments[0], result.assignments[2]);
        // Membership settles by the second pass; one more pass confirms it.
        assert!(result.iterations <= 3);
    }

    #[test]
    fn test_every_vector_assigned_within_range() {
        let vectors = vectors_from(&[
            &[1.0, 5.0],
            &[2.0, 4.0],
            &[9.0, 0.0],
            &[8.0, 1.0],
            &[5.0, 5.0],
        ]);
        let result = cluster(&vectors, 3, DEFAULT_MAX_ITERATIONS).unwrap();
        assert_eq!(result.assignments.len(), vectors.len());
        assert!(result.assignments.iter().all(|&c| c < 3));
    }

    #[test]
    fn test_identical_vectors_collapse_to_lowest_index() {
        // All distances tie at zero, so every vector lands in cluster 0 and
        // cluster 1 stays empty without disturbing the run.
        let vectors = vectors_from(&[&[4.0, 4.0], &[4.0, 4.0], &[4.0, 4.0]]);
        let result = cluster(&vectors, 2, DEFAULT_MAX_ITERATIONS).unwrap();
        assert!(result.converged);
        assert!(result.assignments.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_single_cluster() {
        let vectors = vectors_from(&[&[1.0], &[2.0], &[30.0]]);
        let result = cluster(&vectors, 1, DEFAULT_MAX_ITERATIONS).unwrap();
        assert!(result.converged);
        assert!(result.assignments.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_dimension_mismatch_propagates() {
        let vectors = vectors_from(&[&[1.0, 2.0], &[1.0, 2.0, 3.0]]);
        assert!(matches!(
            cluster(&vectors, 2, DEFAULT_MAX_ITERATIONS),
            Err(ProfilerError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_iteration_bound_reported_not_fatal() {
        let vectors = vectors_from(&[
            &[0.0, 0.0],
            &[0.0, 1.0],
            &[10.0, 10.0],
            &[10.0, 11.0],
        ]);
        // A bound of 1 cannot confirm stability, so the run reports
        // non-convergence but still returns the first assignment.
        let result = cluster(&vectors, 2, 1).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.assignments.len(), 4);
    }
}
