use thiserror::Error;

/// Errors surfaced by the clustering stage. Per-frame conditions (malformed
/// headers, oversized packets) are counted events, not errors; see
/// `stats::FrameCounters`.
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("empty feature vector")]
    EmptyVector,

    #[error("not enough samples to cluster: need at least {needed}, got {got}")]
    InsufficientSamples { needed: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, ProfilerError>;
