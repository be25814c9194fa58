//! Event sources.
//!
//! An [`EventSource`] is anything that can report the chain head, the
//! canonical hash at a height, and the decoded events in a block range.
//! [`EventFetcher`] wraps a source with range chunking and ordering.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use chainproject_core::types::Event;

use crate::error::IngestError;

/// Trait for reading decoded events from a chain client.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Current chain head block number.
    async fn head_block_number(&self) -> Result<u64, IngestError>;
    /// Canonical hash at `number`, or `None` if the source doesn't know it.
    async fn block_hash(&self, number: u64) -> Result<Option<String>, IngestError>;
    /// All events in the inclusive range `[from, to]`.
    async fn events(&self, from: u64, to: u64) -> Result<Vec<Event>, IngestError>;
}

/// Fetcher that wraps an `EventSource` and adds batching logic.
pub struct EventFetcher<S> {
    source: S,
}

impl<S: EventSource> EventFetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the current chain head block number.
    pub async fn head_block_number(&self) -> Result<u64, IngestError> {
        self.source.head_block_number().await
    }

    pub async fn block_hash(&self, number: u64) -> Result<Option<String>, IngestError> {
        self.source.block_hash(number).await
    }

    /// Fetch all events in `[from, to]`, at most `max_range` blocks per call,
    /// ordered by `(block_number, log_index)`.
    pub async fn events(&self, from: u64, to: u64, max_range: u64) -> Result<Vec<Event>, IngestError> {
        if to < from {
            return Ok(vec![]);
        }
        let max_range = max_range.max(1);
        let mut all = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(max_range - 1).min(to);
            all.extend(self.source.events(start, end).await?);
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        // stable: events sharing a log index keep source order
        all.sort_by_key(|e| (e.position.block_number, e.log_index));
        Ok(all)
    }
}

// ─── JsonFileSource ─────────────────────────────────────────────────────────

/// A fixed list of events, typically loaded from a JSON file.
///
/// The head is the highest block any event sits in, and the canonical hash at
/// a height is the hash its events carry.
#[derive(Debug, Clone, Default)]
pub struct JsonFileSource {
    events: Vec<Event>,
    hashes: BTreeMap<u64, String>,
}

impl JsonFileSource {
    pub fn from_events(events: Vec<Event>) -> Self {
        let hashes = events
            .iter()
            .map(|e| (e.position.block_number, e.position.block_hash.clone()))
            .collect();
        Self { events, hashes }
    }

    /// Parse a JSON array of events.
    pub fn from_json(json: &str) -> Result<Self, IngestError> {
        let events: Vec<Event> = serde_json::from_str(json)
            .map_err(|e| IngestError::Source(format!("invalid event file: {e}")))?;
        Ok(Self::from_events(events))
    }

    /// Read and parse an event file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IngestError::Source(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventSource for JsonFileSource {
    async fn head_block_number(&self) -> Result<u64, IngestError> {
        Ok(self.hashes.keys().next_back().copied().unwrap_or(0))
    }

    async fn block_hash(&self, number: u64) -> Result<Option<String>, IngestError> {
        Ok(self.hashes.get(&number).cloned())
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<Event>, IngestError> {
        Ok(self
            .events
            .iter()
            .filter(|e| (from..=to).contains(&e.position.block_number))
            .cloned()
            .collect())
    }
}
