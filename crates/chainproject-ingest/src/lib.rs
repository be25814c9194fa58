//! chainproject-ingest: event sources, retry policy, and the ingestion loop.

pub mod config;
pub mod error;
pub mod ingest_loop;
pub mod retry;
pub mod source;

pub use config::{IngestBuilder, IngestConfig};
pub use error::IngestError;
pub use ingest_loop::{IngestLoop, IngestStatus};
pub use retry::{RetryConfig, RetryPolicy};
pub use source::{EventFetcher, EventSource, JsonFileSource};
