//! chainproject-core: the reorg-safe event projector behind ChainProject.
//!
//! # Architecture
//!
//! ```text
//! IngestLoop → EventProjector
//!                  ├── CheckpointTracker (checkpoint + rollback window)
//!                  ├── reorg             (fork detection)
//!                  ├── project()         (event → record mutation)
//!                  └── ProjectionStore   (memory / SQLite, snapshots)
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod projector;
pub mod reorg;
pub mod store;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointTracker};
pub use config::{ProjectorBuilder, ProjectorConfig};
pub use error::{CheckpointError, ProjectionError, StoreError};
pub use projector::{ApplyOutcome, EventProjector};
pub use reorg::ReorgNotice;
pub use store::{Mutation, ProjectionStore, SnapshotTag, WriteBatch};
pub use types::{
    ChainPosition, Event, EventId, EventPayload, MappingRecord, MappingUpdated,
    OwnershipTransferred, RecordPatch,
};
