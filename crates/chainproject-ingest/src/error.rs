//! Errors surfaced by the ingestion loop.

use thiserror::Error;

use chainproject_core::error::ProjectionError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("event source error: {0}")]
    Source(String),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: ProjectionError,
    },

    #[error("ingestion aborted: {reason}")]
    Aborted { reason: String },
}
