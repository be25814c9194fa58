//! Ingestion configuration and its fluent builder.
//!
//! # Example
//!
//! ```rust
//! use chainproject_ingest::IngestBuilder;
//!
//! let config = IngestBuilder::new()
//!     .from_block(19_000_000)
//!     .confirmation_depth(12)
//!     .batch_size(500)
//!     .build_config();
//! assert_eq!(config.batch_size, 500);
//! ```

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Configuration for an [`IngestLoop`](crate::ingest_loop::IngestLoop).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// First block to request when the projection is at genesis.
    pub from_block: u64,
    /// Stop after this block (`None` = follow the chain forever).
    pub to_block: Option<u64>,
    /// Blocks per `events` request.
    pub batch_size: u64,
    /// Blocks behind head before an event is applied.
    pub confirmation_depth: u64,
    /// Live mode polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Consecutive re-syncs tolerated before giving up.
    pub max_resyncs: u32,
    /// Backoff for retryable store failures.
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            from_block: 0,
            to_block: None,
            batch_size: 1000,
            confirmation_depth: 12,
            poll_interval_ms: 2000,
            max_resyncs: 16,
            retry: RetryConfig::default(),
        }
    }
}

/// Fluent builder for `IngestConfig`.
#[derive(Default)]
pub struct IngestBuilder {
    config: IngestConfig,
}

impl IngestBuilder {
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
        }
    }

    /// Set the start block.
    pub fn from_block(mut self, block: u64) -> Self {
        self.config.from_block = block;
        self
    }

    /// Set the end block (for bounded runs).
    pub fn to_block(mut self, block: u64) -> Self {
        self.config.to_block = Some(block);
        self
    }

    /// Set confirmation depth (blocks behind head before processing).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Set the number of blocks per batch.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_resyncs(mut self, n: u32) -> Self {
        self.config.max_resyncs = n;
        self
    }

    /// Set the retry policy for store failures.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the config.
    pub fn build_config(self) -> IngestConfig {
        self.config
    }
}
