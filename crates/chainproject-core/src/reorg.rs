//! Reorg detection.
//!
//! A same-height hash mismatch is caught by
//! [`CheckpointTracker::check`](crate::checkpoint::CheckpointTracker::check)
//! when an event arrives. Drift further back is found here: the chain client
//! reports a different canonical hash for a tracked height, and the window is
//! walked backward to find the last block both branches share.

use crate::checkpoint::{Checkpoint, CheckpointTracker};

/// Notification that the canonical chain diverged at `fork_block`.
///
/// Every event applied at `fork_block` or above belongs to the abandoned
/// branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgNotice {
    /// The first block height whose tracked hash is no longer canonical.
    pub fork_block: u64,
    /// Tracked positions that will be dropped, most recent first.
    pub dropped: Vec<Checkpoint>,
}

impl ReorgNotice {
    /// A notice without the list of dropped blocks.
    pub fn at(fork_block: u64) -> Self {
        Self {
            fork_block,
            dropped: Vec::new(),
        }
    }

    /// Number of tracked blocks the reorg invalidates.
    pub fn depth(&self) -> u64 {
        self.dropped.len() as u64
    }
}

/// Walk the tracked window backward, comparing each position with the
/// canonical hash reported by `canonical`, and return the fork point.
///
/// Returns `None` when the newest tracked block is still canonical. When no
/// tracked block is canonical the fork is placed just above the window base.
pub fn find_fork<F>(tracker: &CheckpointTracker, mut canonical: F) -> Option<ReorgNotice>
where
    F: FnMut(u64) -> Option<String>,
{
    let mut fork_block = None;
    for cp in tracker.positions().rev() {
        match canonical(cp.block_number) {
            Some(hash) if hash == cp.block_hash => break,
            _ => fork_block = Some(cp.block_number),
        }
    }
    let fork_block = fork_block?;
    let notice = notice_from(tracker, fork_block);
    tracing::warn!(fork_block, depth = notice.depth(), "Fork point located");
    Some(notice)
}

fn notice_from(tracker: &CheckpointTracker, fork_block: u64) -> ReorgNotice {
    ReorgNotice {
        fork_block,
        dropped: tracker
            .positions()
            .rev()
            .take_while(|cp| cp.block_number >= fork_block)
            .cloned()
            .collect(),
    }
}
