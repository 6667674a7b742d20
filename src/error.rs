//! Error types for quadpool.

use crate::segment::SegmentError;
use crate::worker::WorkerId;
use thiserror::Error;

/// Main error type for quadpool.
#[derive(Error, Debug)]
pub enum QuadError {
    #[error(
        "Invalid integration domain [{left}, {right}]: bounds and their distance must be finite"
    )]
    InvalidDomain { left: f64, right: f64 },

    #[error("Invalid maximum deviation {0}: must be finite and greater than zero")]
    InvalidTolerance(f64),

    #[error("Invalid initial partition: {0} segments requested, at least 1 required")]
    InvalidPartition(usize),

    #[error("Segment storage allocation failed: {0}")]
    Allocation(#[from] std::collections::TryReserveError),

    #[error("Failed to spawn worker {worker}: {reason}")]
    Spawn { worker: WorkerId, reason: String },

    #[error(
        "The integration could not complete: all {workers} workers were lost \
         with {outstanding} segments outstanding"
    )]
    PoolExhausted { workers: usize, outstanding: usize },

    #[error("Scheduler stalled: {outstanding} segments outstanding but no request in flight")]
    Stalled { outstanding: usize },

    #[error("Worker returned a non-finite estimate {estimate} for [{left}, {right}]")]
    NonFiniteEstimate { left: f64, right: f64, estimate: f64 },

    #[error("Segment list error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quadpool operations.
pub type Result<T> = std::result::Result<T, QuadError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentId;
    use std::io;

    #[test]
    fn test_pool_exhausted_message() {
        let err = QuadError::PoolExhausted {
            workers: 4,
            outstanding: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("could not complete"));
        assert!(msg.contains("4 workers"));
        assert!(msg.contains("7 segments"));
    }

    #[test]
    fn test_invalid_domain_message() {
        let err = QuadError::InvalidDomain {
            left: f64::NAN,
            right: 1.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("NaN"));
        assert!(msg.contains("finite"));
    }

    #[test]
    fn test_invalid_tolerance_message() {
        let msg = QuadError::InvalidTolerance(-1.0).to_string();
        assert!(msg.contains("-1"));
        assert!(msg.contains("greater than zero"));
    }

    #[test]
    fn test_spawn_error_names_worker() {
        let err = QuadError::Spawn {
            worker: WorkerId(3),
            reason: "no such file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("worker 3"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_segment_error_conversion() {
        let seg_err = SegmentError::Stale(SegmentId::new(2, 5));
        let err: QuadError = seg_err.into();
        assert!(err.to_string().contains("Segment list error"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: QuadError = io_err.into();
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_allocation_error_conversion() {
        let mut v: Vec<u8> = Vec::new();
        let reserve_err = v.try_reserve(usize::MAX).unwrap_err();
        let err: QuadError = reserve_err.into();
        assert!(err.to_string().contains("allocation failed"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<f64> {
            Ok(1.0)
        }

        fn returns_err() -> Result<f64> {
            Err(QuadError::Stalled { outstanding: 1 })
        }

        assert_eq!(returns_ok().unwrap(), 1.0);
        assert!(returns_err().is_err());
    }
}
