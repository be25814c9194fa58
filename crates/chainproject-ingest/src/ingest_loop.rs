//! The ingestion loop: drives an [`EventProjector`] from an [`EventSource`].
//!
//! # Phase 1: BACKFILL
//! Verify the stored checkpoint against the source, then fetch events from
//! the resume point to `head - confirmation_depth` in batches and apply them
//! in chain order.
//!
//! # Phase 2: LIVE
//! Poll for new confirmed blocks every `poll_interval_ms` and run the same
//! pass over the new range, until `to_block` is reached.
//!
//! Projection failures are classified per event:
//!   - `StoreFailure` is retried with backoff
//!   - `OutOfOrder` re-syncs from the checkpoint
//!   - `ReorgDetected` locates the fork, rolls back, and re-syncs
//!   - anything else stops the loop

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use chainproject_core::checkpoint::Checkpoint;
use chainproject_core::error::ProjectionError;
use chainproject_core::projector::EventProjector;
use chainproject_core::reorg::{find_fork, ReorgNotice};
use chainproject_core::store::ProjectionStore;
use chainproject_core::types::Event;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::retry::RetryPolicy;
use crate::source::{EventFetcher, EventSource};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// Not yet started.
    Idle,
    /// Catching up to the confirmed head.
    Backfilling,
    /// Following the chain tip.
    Live,
    /// Locating a fork and rolling back.
    ReorgRecovery,
    /// Reached `to_block`.
    Stopped,
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

enum Step {
    Continue,
    Resync,
}

/// Pulls events from a source and applies them through a projector.
pub struct IngestLoop<S: EventSource, St: ProjectionStore> {
    config: IngestConfig,
    fetcher: EventFetcher<S>,
    projector: EventProjector<St>,
    retry: RetryPolicy,
    status: IngestStatus,
    /// Highest block whose events were all fetched and applied this session.
    synced_to: Option<u64>,
}

impl<S: EventSource, St: ProjectionStore> IngestLoop<S, St> {
    pub fn new(config: IngestConfig, source: S, projector: EventProjector<St>) -> Self {
        Self {
            fetcher: EventFetcher::new(source),
            retry: RetryPolicy::new(config.retry.clone()),
            projector,
            status: IngestStatus::Idle,
            synced_to: None,
            config,
        }
    }

    pub fn status(&self) -> IngestStatus {
        self.status
    }

    pub fn projector(&self) -> &EventProjector<St> {
        &self.projector
    }

    pub fn into_projector(self) -> EventProjector<St> {
        self.projector
    }

    pub fn source(&self) -> &S {
        self.fetcher.source()
    }

    /// Highest block fully processed since this loop was created.
    pub fn synced_to(&self) -> Option<u64> {
        self.synced_to
    }

    /// Backfill to the confirmed head, then follow the chain until `to_block`.
    pub async fn run(&mut self) -> Result<(), IngestError> {
        self.status = IngestStatus::Backfilling;
        let target = self.confirmed_target().await?;
        info!(
            projection = %self.projector.config().id,
            from = self.next_block(),
            target = ?target,
            "Starting backfill phase"
        );
        if let Some(target) = target {
            self.run_until(target).await?;
            if self.reached_end(target) {
                self.status = IngestStatus::Stopped;
                return Ok(());
            }
        }

        self.status = IngestStatus::Live;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            tokio::time::sleep(poll_interval).await;

            let Some(target) = self.confirmed_target().await? else {
                continue;
            };
            if self.synced_to.is_some_and(|synced| synced >= target) {
                continue; // Nothing new yet
            }
            self.run_until(target).await?;

            if self.reached_end(target) {
                self.status = IngestStatus::Stopped;
                return Ok(());
            }
        }
    }

    /// Apply every event up to and including block `target`.
    ///
    /// Verifies the checkpoint first, so a reorg that happened while the
    /// loop was away is rolled back before new events land. Returns the
    /// checkpoint reached.
    pub async fn run_until(&mut self, target: u64) -> Result<Checkpoint, IngestError> {
        self.verify_checkpoint().await?;

        let batch = self.config.batch_size.max(1);
        let mut resyncs = 0u32;
        let mut current = self.next_block();

        'batches: while current <= target {
            let batch_end = current.saturating_add(batch - 1).min(target);
            let events = self.fetcher.events(current, batch_end, batch).await?;

            for event in &events {
                if let Step::Resync = self.apply_event(event).await? {
                    resyncs += 1;
                    if resyncs > self.config.max_resyncs {
                        return Err(IngestError::Aborted {
                            reason: format!("re-synced {resyncs} times in a row without progress"),
                        });
                    }
                    current = self.next_block();
                    info!(from = current, "Re-syncing from checkpoint");
                    continue 'batches;
                }
            }

            resyncs = 0;
            self.synced_to = Some(batch_end);
            info!(
                current,
                batch_end,
                target,
                events = events.len(),
                checkpoint = self.projector.checkpoint().block_number,
                "Batch complete"
            );

            if batch_end == u64::MAX {
                break;
            }
            current = batch_end + 1;
        }

        Ok(self.projector.checkpoint())
    }

    async fn apply_event(&mut self, event: &Event) -> Result<Step, IngestError> {
        let mut attempt = 0u32;
        loop {
            match self.projector.apply(event).await {
                Ok(outcome) => {
                    debug!(block = event.block_number(), ?outcome, "event processed");
                    return Ok(Step::Continue);
                }
                Err(ProjectionError::ReorgDetected { block_number, .. }) => {
                    self.recover_reorg(Some(block_number)).await?;
                    return Ok(Step::Resync);
                }
                Err(ProjectionError::OutOfOrder {
                    block_number,
                    checkpoint,
                }) => {
                    warn!(block_number, checkpoint, "Event behind checkpoint");
                    self.synced_to = None;
                    return Ok(Step::Resync);
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        return Err(IngestError::RetriesExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    };
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Roll back if the source no longer agrees with the checkpoint's hash.
    async fn verify_checkpoint(&mut self) -> Result<(), IngestError> {
        let checkpoint = self.projector.checkpoint();
        if checkpoint.is_genesis() {
            return Ok(());
        }
        match self.fetcher.block_hash(checkpoint.block_number).await? {
            Some(hash) if hash != checkpoint.block_hash => {
                warn!(
                    block = checkpoint.block_number,
                    tracked = %checkpoint.block_hash,
                    canonical = %hash,
                    "Checkpoint no longer canonical"
                );
                self.recover_reorg(None).await
            }
            _ => Ok(()),
        }
    }

    /// Find the fork by asking the source for canonical hashes of tracked
    /// blocks, newest first, then roll the projection back below it.
    ///
    /// `hint` is the height where a conflicting event was seen; it is used
    /// when the source still reports every tracked hash as canonical.
    async fn recover_reorg(&mut self, hint: Option<u64>) -> Result<(), IngestError> {
        let previous = self.status;
        self.status = IngestStatus::ReorgRecovery;

        let tracked: Vec<Checkpoint> = self.projector.tracker().positions().rev().cloned().collect();
        let mut canonical = HashMap::new();
        for cp in tracked {
            let hash = self.fetcher.block_hash(cp.block_number).await?;
            let agrees = hash.as_deref() == Some(cp.block_hash.as_str());
            if let Some(hash) = hash {
                canonical.insert(cp.block_number, hash);
            }
            if agrees {
                break;
            }
        }

        let notice = find_fork(self.projector.tracker(), |n| canonical.get(&n).cloned())
            .or_else(|| hint.map(ReorgNotice::at));
        if let Some(notice) = notice {
            let checkpoint = self.projector.handle_reorg(&notice).await?;
            info!(
                fork_block = notice.fork_block,
                depth = notice.depth(),
                resume = checkpoint.block_number,
                "Reorg recovery complete"
            );
        }

        self.synced_to = None;
        self.status = previous;
        Ok(())
    }

    /// First block the next pass should request.
    fn next_block(&self) -> u64 {
        if let Some(synced) = self.synced_to {
            return synced.saturating_add(1);
        }
        let checkpoint = self.projector.checkpoint();
        if checkpoint.is_genesis() {
            self.config.from_block
        } else {
            // The checkpoint block may have been partially applied.
            checkpoint.block_number.max(self.config.from_block)
        }
    }

    /// `head - confirmation_depth` bounded by `to_block`; `None` while no
    /// block is confirmed yet.
    async fn confirmed_target(&self) -> Result<Option<u64>, IngestError> {
        let head = self.fetcher.head_block_number().await?;
        let Some(confirmed) = head.checked_sub(self.config.confirmation_depth) else {
            return Ok(None);
        };
        Ok(Some(match self.config.to_block {
            Some(to_block) => confirmed.min(to_block),
            None => confirmed,
        }))
    }

    fn reached_end(&self, target: u64) -> bool {
        self.config.to_block.is_some_and(|to_block| target >= to_block)
    }
}
