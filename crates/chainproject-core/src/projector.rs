//! The event projector: folds decoded events into the Mapping table.
//!
//! For every event the projector:
//!   - checks the event's position against the checkpoint (hash, ordering, forks)
//!   - skips event ids it already applied
//!   - snapshots the store when the event opens a new block
//!   - commits the record mutation and the new checkpoint in one batch
//!   - advances the checkpoint tracker
//!
//! On a reorg notice it reverts the store to the last snapshot strictly
//! below the fork and rewinds the tracker to match.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointTracker};
use crate::config::ProjectorConfig;
use crate::error::ProjectionError;
use crate::reorg::ReorgNotice;
use crate::store::{Mutation, ProjectionStore, SnapshotTag, WriteBatch};
use crate::types::{record_id, Event, EventId, EventPayload, RecordPatch};

/// What `apply` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A record was written and the checkpoint advanced.
    Applied,
    /// No record change; the checkpoint advanced past the event.
    Acknowledged,
    /// The event id was already applied; nothing changed.
    Duplicate,
}

/// Map an event onto the record mutation it implies.
///
/// Ownership transfers carry no Mapping data and only move the checkpoint.
pub fn project(payload: &EventPayload) -> Option<Mutation> {
    match payload {
        EventPayload::MappingUpdated(ev) => Some(Mutation::Upsert {
            id: record_id(&ev.sender),
            patch: RecordPatch::from(ev),
        }),
        EventPayload::OwnershipTransferred(_) => None,
    }
}

/// Applies events for one logical stream to a [`ProjectionStore`].
///
/// There is exactly one writer per store: `apply` and `handle_reorg` take
/// `&mut self`. Readers share the store through [`EventProjector::store`].
pub struct EventProjector<S: ProjectionStore> {
    store: Arc<S>,
    tracker: CheckpointTracker,
    /// Event ids applied per block, for the blocks still in the window.
    applied: BTreeMap<u64, HashSet<EventId>>,
    config: ProjectorConfig,
}

impl<S: ProjectionStore> EventProjector<S> {
    /// Open a projector over `store`, resuming from its persisted checkpoint.
    pub async fn open(store: Arc<S>, config: ProjectorConfig) -> Result<Self, ProjectionError> {
        let checkpoint = store.load_checkpoint().await?.unwrap_or_default();
        let history = store
            .snapshots()
            .await?
            .iter()
            .map(SnapshotTag::checkpoint)
            .collect();
        let tracker = CheckpointTracker::restore(history, checkpoint.clone(), config.reorg_window);

        if checkpoint.is_genesis() {
            info!(projection = %config.id, chain = %config.chain, "Starting from genesis");
        } else {
            info!(
                projection = %config.id,
                block = checkpoint.block_number,
                hash = %checkpoint.block_hash,
                window = tracker.len(),
                "Resuming from checkpoint"
            );
        }

        Ok(Self {
            store,
            tracker,
            applied: BTreeMap::new(),
            config,
        })
    }

    /// The furthest applied position.
    pub fn checkpoint(&self) -> Checkpoint {
        self.tracker.current()
    }

    pub fn tracker(&self) -> &CheckpointTracker {
        &self.tracker
    }

    /// Shared handle to the underlying store, for readers.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Apply one event.
    pub async fn apply(&mut self, event: &Event) -> Result<ApplyOutcome, ProjectionError> {
        let position = &event.position;
        let current = self.tracker.current();

        // Everything `advance` would reject fails here, before the store is touched.
        self.tracker.check(position)?;

        if self.config.dedup && self.is_applied(event) {
            debug!(
                tx = %event.tx_hash,
                log_index = event.log_index,
                block = position.block_number,
                "duplicate event skipped"
            );
            return Ok(ApplyOutcome::Duplicate);
        }

        // The first event of a block fixes the rollback point for that block.
        if !current.is_at(position) {
            self.store.snapshot(&SnapshotTag::from(&current)).await?;
        }

        let mutation = project(&event.payload);
        let outcome = if mutation.is_some() {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Acknowledged
        };

        let batch = WriteBatch {
            mutations: mutation.into_iter().collect(),
            checkpoint: Some(Checkpoint::at(position)),
        };
        self.store.commit(batch).await?;

        let base_before = self.tracker.base().clone();
        self.tracker.advance(position)?;
        if self.config.dedup {
            self.applied
                .entry(position.block_number)
                .or_default()
                .insert(event.id());
        }

        debug!(
            kind = event.payload.kind(),
            tx = %event.tx_hash,
            block = position.block_number,
            ?outcome,
            "event applied"
        );

        if *self.tracker.base() != base_before {
            self.prune().await;
        }

        Ok(outcome)
    }

    /// Apply events in order, stopping at the first error.
    ///
    /// Returns how many events were not duplicates.
    pub async fn apply_batch(&mut self, events: &[Event]) -> Result<usize, ProjectionError> {
        let mut count = 0;
        for event in events {
            if self.apply(event).await? != ApplyOutcome::Duplicate {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Roll the store and checkpoint back to the last checkpoint strictly
    /// below `notice.fork_block`. Returns the checkpoint to resume after.
    pub async fn handle_reorg(&mut self, notice: &ReorgNotice) -> Result<Checkpoint, ProjectionError> {
        let current = self.tracker.current();
        if current.is_genesis() || notice.fork_block > current.block_number {
            debug!(
                fork_block = notice.fork_block,
                checkpoint = current.block_number,
                "reorg above checkpoint; nothing to roll back"
            );
            return Ok(current);
        }

        let target = self.tracker.rollback_target(notice.fork_block).ok_or_else(|| {
            ProjectionError::ReorgTooDeep {
                fork_block: notice.fork_block,
                oldest: self.tracker.base().block_number,
            }
        })?;

        self.store.revert_to(&SnapshotTag::from(&target)).await?;
        let checkpoint = self.tracker.rollback_before(notice.fork_block);
        self.applied.retain(|block, _| *block < notice.fork_block);

        warn!(
            projection = %self.config.id,
            fork_block = notice.fork_block,
            depth = notice.depth(),
            from = current.block_number,
            to = checkpoint.block_number,
            "Rolled back projection"
        );
        Ok(checkpoint)
    }

    fn is_applied(&self, event: &Event) -> bool {
        self.applied
            .get(&event.position.block_number)
            .is_some_and(|ids| ids.contains(&event.id()))
    }

    /// Drop snapshots and applied ids that fell out of the rollback window.
    async fn prune(&mut self) {
        let floor = self.tracker.base().block_number;
        self.applied.retain(|block, _| *block >= floor);
        if let Err(err) = self.store.prune_snapshots(floor).await {
            // Left in place until the next eviction prunes again.
            warn!(floor, error = %err, "snapshot pruning failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MappingUpdated, OwnershipTransferred};

    #[test]
    fn mapping_update_projects_to_full_upsert() {
        let payload = EventPayload::MappingUpdated(MappingUpdated {
            sender: "0xABC".into(),
            key: "0x01".into(),
            foreign_token: "0xaaa".into(),
            home_token: "0xbbb".into(),
            foreign_bridge: "0xccc".into(),
            home_bridge: "0xddd".into(),
            foreign_start_block: 100,
            home_start_block: 200,
        });

        match project(&payload) {
            Some(Mutation::Upsert { id, patch }) => {
                assert_eq!(id, "0xabc");
                assert_eq!(patch.key.as_deref(), Some("0x01"));
                assert_eq!(patch.home_bridge.as_deref(), Some("0xddd"));
                assert_eq!(patch.foreign_start_block, Some(100));
                assert_eq!(patch.home_start_block, Some(200));
            }
            other => panic!("unexpected mutation: {other:?}"),
        }
    }

    #[test]
    fn ownership_transfer_projects_to_nothing() {
        let payload = EventPayload::OwnershipTransferred(OwnershipTransferred {
            previous_owner: "0x1".into(),
            new_owner: "0x2".into(),
        });
        assert!(project(&payload).is_none());
    }
}
