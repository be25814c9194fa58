//! Error types for the projection pipeline.

use thiserror::Error;

/// Errors raised by a [`ProjectionStore`](crate::store::ProjectionStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no snapshot tagged at block {block_number} ({block_hash})")]
    UnknownSnapshot { block_number: u64, block_hash: String },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store corrupted: {0}")]
    Corrupted(String),
}

/// Errors raised by the [`CheckpointTracker`](crate::checkpoint::CheckpointTracker).
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint regression: current block {current}, attempted {attempted}")]
    Regression { current: u64, attempted: u64 },

    #[error("hash mismatch at block {block_number}: tracked {tracked}, got {actual}")]
    HashMismatch {
        block_number: u64,
        tracked: String,
        actual: String,
    },

    #[error("empty block hash at block {block_number}")]
    MissingHash { block_number: u64 },
}

/// Errors returned by [`EventProjector`](crate::projector::EventProjector).
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("event at block {block_number} carries no block hash")]
    MissingBlockHash { block_number: u64 },

    #[error("out-of-order event at block {block_number}: checkpoint is at block {checkpoint}")]
    OutOfOrder { block_number: u64, checkpoint: u64 },

    #[error("store failure: {0}")]
    StoreFailure(#[source] StoreError),

    #[error("Reorg detected at block {block_number}: expected hash {expected}, got {actual}")]
    ReorgDetected {
        block_number: u64,
        expected: String,
        actual: String,
    },

    #[error("reorg at block {fork_block} is deeper than the retained window (oldest block {oldest})")]
    ReorgTooDeep { fork_block: u64, oldest: u64 },

    #[error("unrecoverable store corruption: {0}")]
    Corrupted(String),
}

impl ProjectionError {
    /// Returns `true` if the error is a reorg signal rather than a failure.
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgDetected { .. })
    }

    /// Returns `true` if the caller may retry the same event after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreFailure(_))
    }
}

impl From<StoreError> for ProjectionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupted(reason) => Self::Corrupted(reason),
            other => Self::StoreFailure(other),
        }
    }
}

impl From<CheckpointError> for ProjectionError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Regression { current, attempted } => Self::OutOfOrder {
                block_number: attempted,
                checkpoint: current,
            },
            CheckpointError::HashMismatch {
                block_number,
                tracked,
                actual,
            } => Self::ReorgDetected {
                block_number,
                expected: tracked,
                actual,
            },
            CheckpointError::MissingHash { block_number } => Self::MissingBlockHash { block_number },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_retryable() {
        let err = ProjectionError::from(StoreError::Backend("disk full".into()));
        assert!(err.is_retryable());
        assert!(!err.is_reorg());
    }

    #[test]
    fn corruption_is_fatal() {
        let err = ProjectionError::from(StoreError::Corrupted("bad row".into()));
        assert!(matches!(err, ProjectionError::Corrupted(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn checkpoint_errors_map_onto_projection_taxonomy() {
        let err = ProjectionError::from(CheckpointError::Regression {
            current: 10,
            attempted: 9,
        });
        assert!(matches!(
            err,
            ProjectionError::OutOfOrder { block_number: 9, checkpoint: 10 }
        ));

        let err = ProjectionError::from(CheckpointError::MissingHash { block_number: 7 });
        assert!(matches!(err, ProjectionError::MissingBlockHash { block_number: 7 }));
        assert!(!err.is_retryable());

        let err = ProjectionError::from(CheckpointError::HashMismatch {
            block_number: 5,
            tracked: "0xa".into(),
            actual: "0xb".into(),
        });
        assert!(err.is_reorg());
    }
}
