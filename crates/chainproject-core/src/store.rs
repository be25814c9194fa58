//! The projection store contract.
//!
//! Implementations include `MemoryStore` and `SqliteStore` in
//! `chainproject-storage`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::StoreError;
use crate::types::{MappingRecord, RecordPatch};

/// Label of a stored snapshot: the checkpoint its state corresponds to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotTag {
    pub block_number: u64,
    pub block_hash: String,
}

impl From<&Checkpoint> for SnapshotTag {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            block_number: cp.block_number,
            block_hash: cp.block_hash.clone(),
        }
    }
}

impl SnapshotTag {
    /// The checkpoint this tag was taken at (without its original timestamp).
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            block_number: self.block_number,
            block_hash: self.block_hash.clone(),
            updated_at: 0,
        }
    }
}

/// A single record mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create or partially update the record with this id.
    Upsert { id: String, patch: RecordPatch },
    /// Remove the record with this id (absent ids are ignored).
    Delete { id: String },
}

impl Mutation {
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id } => id,
        }
    }
}

/// Record mutations plus an optional checkpoint, committed atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub mutations: Vec<Mutation>,
    pub checkpoint: Option<Checkpoint>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.checkpoint.is_none()
    }
}

/// Keyed table of Mapping records with snapshot/revert support.
///
/// Every write method applies as one atomic step: concurrent readers see
/// either all of it or none of it. A writer always reads its own writes.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Load the record with this id.
    async fn load(&self, id: &str) -> Result<Option<MappingRecord>, StoreError>;

    /// Apply mutations and the checkpoint as a single transaction.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// The checkpoint stored by the last commit or revert.
    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError>;

    /// Capture the current records and checkpoint under `tag`.
    /// Re-using a tag replaces the earlier snapshot.
    async fn snapshot(&self, tag: &SnapshotTag) -> Result<(), StoreError>;

    /// Restore records and checkpoint as of `tag`, discarding every later
    /// mutation and every snapshot above `tag`.
    async fn revert_to(&self, tag: &SnapshotTag) -> Result<(), StoreError>;

    /// Snapshot tags currently held, oldest first.
    async fn snapshots(&self) -> Result<Vec<SnapshotTag>, StoreError>;

    /// Drop snapshots tagged below `block_number`.
    async fn prune_snapshots(&self, block_number: u64) -> Result<(), StoreError>;

    /// Up to `limit` records ordered by id.
    async fn list(&self, limit: usize) -> Result<Vec<MappingRecord>, StoreError>;

    /// Number of records.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Full or partial replace of one record.
    async fn upsert(&self, id: &str, patch: RecordPatch) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().push(Mutation::Upsert {
            id: id.to_string(),
            patch,
        }))
        .await
    }

    /// Remove one record.
    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().push(Mutation::Delete { id: id.to_string() }))
            .await
    }
}

/// Apply one mutation to a record slot. Shared by backends that hold records
/// as plain values.
pub fn apply_mutation(current: Option<MappingRecord>, mutation: &Mutation) -> Option<MappingRecord> {
    match mutation {
        Mutation::Upsert { id, patch } => {
            let mut record = current.unwrap_or_else(|| MappingRecord::empty(id.clone()));
            record.apply(patch);
            Some(record)
        }
        Mutation::Delete { .. } => None,
    }
}
