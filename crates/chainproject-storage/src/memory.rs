//! In-memory projection store.
//!
//! Holds records, the checkpoint, and full-copy snapshots in RAM.
//! Useful for testing and short-lived projections that don't need persistence.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use tracing::debug;

use chainproject_core::checkpoint::Checkpoint;
use chainproject_core::error::StoreError;
use chainproject_core::store::{apply_mutation, ProjectionStore, SnapshotTag, WriteBatch};
use chainproject_core::types::MappingRecord;

#[derive(Debug, Clone, Default)]
struct Table {
    records: BTreeMap<String, MappingRecord>,
    checkpoint: Option<Checkpoint>,
}

/// In-memory projection store.
///
/// Each commit runs under a single write lock, so readers never observe a
/// half-applied batch. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    table: RwLock<Table>,
    snapshots: Mutex<BTreeMap<SnapshotTag, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Table>, StoreError> {
        self.table.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Table>, StoreError> {
        self.table.write().map_err(|_| StoreError::Poisoned)
    }

    fn snapshot_map(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<SnapshotTag, Table>>, StoreError> {
        self.snapshots.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<MappingRecord>, StoreError> {
        Ok(self.read()?.records.get(id).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut table = self.write()?;
        for mutation in &batch.mutations {
            let id = mutation.id().to_string();
            let current = table.records.remove(&id);
            if let Some(record) = apply_mutation(current, mutation) {
                table.records.insert(id, record);
            }
        }
        if let Some(cp) = batch.checkpoint {
            table.checkpoint = Some(cp);
        }
        debug!(mutations = batch.mutations.len(), "batch committed");
        Ok(())
    }

    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.read()?.checkpoint.clone())
    }

    async fn snapshot(&self, tag: &SnapshotTag) -> Result<(), StoreError> {
        let copy = self.read()?.clone();
        self.snapshot_map()?.insert(tag.clone(), copy);
        debug!(block = tag.block_number, "snapshot taken");
        Ok(())
    }

    async fn revert_to(&self, tag: &SnapshotTag) -> Result<(), StoreError> {
        let mut snapshots = self.snapshot_map()?;
        let restored = snapshots
            .get(tag)
            .cloned()
            .ok_or_else(|| StoreError::UnknownSnapshot {
                block_number: tag.block_number,
                block_hash: tag.block_hash.clone(),
            })?;
        *self.write()? = restored;
        snapshots.retain(|t, _| t.block_number <= tag.block_number);
        debug!(block = tag.block_number, "reverted to snapshot");
        Ok(())
    }

    async fn snapshots(&self) -> Result<Vec<SnapshotTag>, StoreError> {
        Ok(self.snapshot_map()?.keys().cloned().collect())
    }

    async fn prune_snapshots(&self, block_number: u64) -> Result<(), StoreError> {
        self.snapshot_map()?
            .retain(|t, _| t.block_number >= block_number);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<MappingRecord>, StoreError> {
        Ok(self.read()?.records.values().take(limit).cloned().collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainproject_core::store::Mutation;
    use chainproject_core::types::RecordPatch;

    fn patch(key: &str, start: u64) -> RecordPatch {
        RecordPatch {
            key: Some(key.into()),
            foreign_start_block: Some(start),
            ..Default::default()
        }
    }

    fn tag(n: u64) -> SnapshotTag {
        SnapshotTag {
            block_number: n,
            block_hash: format!("0x{n}"),
        }
    }

    #[tokio::test]
    async fn upsert_then_load_reads_own_write() {
        let store = MemoryStore::new();
        store.upsert("0xabc", patch("0x01", 100)).await.unwrap();

        let rec = store.load("0xabc").await.unwrap().unwrap();
        assert_eq!(rec.id, "0xabc");
        assert_eq!(rec.key, "0x01");
        assert_eq!(rec.foreign_start_block, 100);
        assert!(store.load("0xdef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_upsert_keeps_prior_fields() {
        let store = MemoryStore::new();
        store.upsert("0xabc", patch("0x01", 100)).await.unwrap();
        store
            .upsert(
                "0xabc",
                RecordPatch {
                    home_token: Some("0xbbb".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let rec = store.load("0xabc").await.unwrap().unwrap();
        assert_eq!(rec.key, "0x01");
        assert_eq!(rec.home_token, "0xbbb");
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = MemoryStore::new();
        store.upsert("0xabc", patch("0x01", 1)).await.unwrap();
        store.delete("0xabc").await.unwrap();
        assert!(store.load("0xabc").await.unwrap().is_none());
        // deleting an absent id is fine
        store.delete("0xabc").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_writes_records_and_checkpoint_together() {
        let store = MemoryStore::new();
        let cp = Checkpoint {
            block_number: 10,
            block_hash: "0x10".into(),
            updated_at: 0,
        };
        let batch = WriteBatch::new()
            .push(Mutation::Upsert {
                id: "0x1".into(),
                patch: patch("0x01", 1),
            })
            .push(Mutation::Upsert {
                id: "0x2".into(),
                patch: patch("0x02", 2),
            })
            .checkpoint(cp.clone());
        store.commit(batch).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.load_checkpoint().await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn revert_restores_snapshot_exactly() {
        let store = MemoryStore::new();
        store.upsert("0xa", patch("0x01", 1)).await.unwrap();
        store.snapshot(&tag(5)).await.unwrap();
        let before = store.list(usize::MAX).await.unwrap();

        store.upsert("0xa", patch("0x99", 99)).await.unwrap();
        store.upsert("0xb", patch("0x02", 2)).await.unwrap();
        store.delete("0xa").await.unwrap();
        store.snapshot(&tag(7)).await.unwrap();

        store.revert_to(&tag(5)).await.unwrap();
        assert_eq!(store.list(usize::MAX).await.unwrap(), before);
        // snapshots above the restored tag are gone
        assert_eq!(store.snapshots().await.unwrap(), vec![tag(5)]);
    }

    #[tokio::test]
    async fn revert_to_unknown_tag_fails() {
        let store = MemoryStore::new();
        let err = store.revert_to(&tag(3)).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownSnapshot { block_number: 3, .. }));
    }

    #[tokio::test]
    async fn prune_drops_older_snapshots() {
        let store = MemoryStore::new();
        for n in [1, 2, 3, 4] {
            store.snapshot(&tag(n)).await.unwrap();
        }
        store.prune_snapshots(3).await.unwrap();
        assert_eq!(store.snapshots().await.unwrap(), vec![tag(3), tag(4)]);
    }

    #[tokio::test]
    async fn list_is_ordered_and_limited() {
        let store = MemoryStore::new();
        for id in ["0xc", "0xa", "0xb"] {
            store.upsert(id, patch("0x00", 0)).await.unwrap();
        }
        let ids: Vec<_> = store
            .list(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["0xa", "0xb"]);
    }
}
