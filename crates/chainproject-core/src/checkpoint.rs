//! Checkpoint tracking: the furthest chain position whose events have been
//! durably applied, plus a sliding window of earlier block positions that a
//! reorg can roll back to.
//!
//! The tracker itself is in-memory. Persistence happens through the store:
//! the projector writes the new checkpoint in the same
//! [`WriteBatch`](crate::store::WriteBatch) as the record mutation it guards.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::types::ChainPosition;

/// Default number of blocks retained for reorg rollback.
/// A window of 128 covers deep reorgs for all major EVM chains.
pub const DEFAULT_REORG_WINDOW: usize = 128;

/// A persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last successfully processed block number.
    pub block_number: u64,
    /// Last successfully processed block hash. Empty at genesis.
    pub block_hash: String,
    /// Unix timestamp of when this checkpoint was produced.
    pub updated_at: i64,
}

impl Checkpoint {
    /// The starting checkpoint before any event has been applied.
    pub fn genesis() -> Self {
        Self {
            block_number: 0,
            block_hash: String::new(),
            updated_at: 0,
        }
    }

    /// A checkpoint at `position`, stamped with the current time.
    pub fn at(position: &ChainPosition) -> Self {
        Self {
            block_number: position.block_number,
            block_hash: position.block_hash.clone(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.block_hash.is_empty()
    }

    pub fn position(&self) -> ChainPosition {
        ChainPosition::new(self.block_number, self.block_hash.clone())
    }

    /// Returns `true` if this checkpoint marks the same block as `position`.
    pub fn is_at(&self, position: &ChainPosition) -> bool {
        self.block_number == position.block_number && self.block_hash == position.block_hash
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Tracks the current checkpoint and the last N applied block positions.
///
/// The front of the window is the *base*: the oldest checkpoint a reorg can
/// still roll back to. It starts out as genesis and moves forward as blocks
/// are evicted.
pub struct CheckpointTracker {
    /// Oldest first; never empty.
    window: VecDeque<Checkpoint>,
    /// Maximum number of blocks retained above the base.
    window_size: usize,
}

impl CheckpointTracker {
    /// A tracker starting at genesis.
    pub fn new(window_size: usize) -> Self {
        Self::resume(Checkpoint::genesis(), window_size)
    }

    /// A tracker resuming from a persisted checkpoint.
    pub fn resume(checkpoint: Checkpoint, window_size: usize) -> Self {
        let mut window = VecDeque::with_capacity(window_size.saturating_add(1).min(1024));
        window.push_back(checkpoint);
        Self {
            window,
            window_size: window_size.max(1),
        }
    }

    /// Restore the rollback window from previously persisted positions
    /// (oldest first) followed by the current checkpoint.
    pub fn restore(history: Vec<Checkpoint>, current: Checkpoint, window_size: usize) -> Self {
        let mut tracker = Self::resume(current.clone(), window_size);
        tracker.window.clear();
        for cp in history {
            if cp.block_number < current.block_number
                && tracker
                    .window
                    .back()
                    .map_or(true, |last| last.block_number < cp.block_number)
            {
                tracker.window.push_back(cp);
            }
        }
        tracker.window.push_back(current);
        tracker.evict();
        tracker
    }

    /// The furthest applied position.
    pub fn current(&self) -> Checkpoint {
        self.head().clone()
    }

    fn head(&self) -> &Checkpoint {
        // The window always holds at least the base.
        &self.window[self.window.len() - 1]
    }

    /// The oldest checkpoint still available as a rollback target.
    pub fn base(&self) -> &Checkpoint {
        &self.window[0]
    }

    /// Validate `position` against the head without moving it.
    ///
    /// An empty hash is rejected (it marks genesis), as is a lower block
    /// number or a different hash at the current height.
    pub fn check(&self, position: &ChainPosition) -> Result<(), CheckpointError> {
        if position.block_hash.is_empty() {
            return Err(CheckpointError::MissingHash {
                block_number: position.block_number,
            });
        }
        let head = self.head();
        if position.block_number < head.block_number {
            return Err(CheckpointError::Regression {
                current: head.block_number,
                attempted: position.block_number,
            });
        }
        if position.block_number == head.block_number
            && !head.is_genesis()
            && head.block_hash != position.block_hash
        {
            return Err(CheckpointError::HashMismatch {
                block_number: position.block_number,
                tracked: head.block_hash.clone(),
                actual: position.block_hash.clone(),
            });
        }
        Ok(())
    }

    /// Advance to `position`.
    ///
    /// Re-advancing to the current block with the same hash is a no-op;
    /// anything [`check`](Self::check) rejects is an error.
    pub fn advance(&mut self, position: &ChainPosition) -> Result<(), CheckpointError> {
        self.check(position)?;
        if self.head().is_at(position) {
            return Ok(());
        }
        self.window.push_back(Checkpoint::at(position));
        self.evict();
        Ok(())
    }

    fn evict(&mut self) {
        while self.window.len() > self.window_size + 1 {
            self.window.pop_front();
        }
    }

    /// Returns `true` if a rollback below `block_number` lands inside the window.
    pub fn can_rollback_before(&self, block_number: u64) -> bool {
        let base = self.base();
        base.is_genesis() || base.block_number < block_number
    }

    /// The checkpoint `rollback_before(block_number)` would return, without
    /// changing anything. `None` if the target left the window.
    pub fn rollback_target(&self, block_number: u64) -> Option<Checkpoint> {
        if !self.can_rollback_before(block_number) {
            return None;
        }
        self.window
            .iter()
            .rev()
            .find(|cp| cp.block_number < block_number)
            .or_else(|| self.window.front())
            .cloned()
    }

    /// Discard every position at or above `block_number` and return the new
    /// current checkpoint. Falls back to the window base when nothing lies
    /// strictly below `block_number`.
    pub fn rollback_before(&mut self, block_number: u64) -> Checkpoint {
        while self.window.len() > 1 && self.head().block_number >= block_number {
            self.window.pop_back();
        }
        self.current()
    }

    /// The tracked hash at `block_number`, if it is still in the window.
    pub fn hash_at(&self, block_number: u64) -> Option<&str> {
        self.window
            .iter()
            .find(|cp| cp.block_number == block_number && !cp.is_genesis())
            .map(|cp| cp.block_hash.as_str())
    }

    /// Retained positions, oldest first (genesis excluded).
    pub fn positions(&self) -> impl DoubleEndedIterator<Item = &Checkpoint> {
        self.window.iter().filter(|cp| !cp.is_genesis())
    }

    /// Number of retained block positions above the base.
    pub fn len(&self) -> usize {
        self.window.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
