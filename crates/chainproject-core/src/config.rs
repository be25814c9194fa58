//! Projector configuration and the fluent builder for it.
//!
//! # Example
//!
//! ```rust
//! use chainproject_core::config::ProjectorBuilder;
//!
//! let config = ProjectorBuilder::new()
//!     .id("bridge-mapper")
//!     .chain("ethereum")
//!     .reorg_window(64)
//!     .build_config();
//! assert_eq!(config.reorg_window, 64);
//! ```

use serde::{Deserialize, Serialize};

use crate::checkpoint::DEFAULT_REORG_WINDOW;

/// Configuration for an [`EventProjector`](crate::projector::EventProjector).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Name of this projection (used in logs).
    pub id: String,
    /// Chain the events come from (e.g. `"ethereum"`).
    pub chain: String,
    /// Number of recent blocks a reorg can roll back through.
    pub reorg_window: usize,
    /// Skip events whose `(tx_hash, log_index)` was already applied.
    pub dedup: bool,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            chain: "ethereum".into(),
            reorg_window: DEFAULT_REORG_WINDOW,
            dedup: true,
        }
    }
}

/// Fluent builder for `ProjectorConfig`.
#[derive(Default)]
pub struct ProjectorBuilder {
    config: ProjectorConfig,
}

impl ProjectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projection name.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the chain slug.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set how many blocks stay available for reorg rollback.
    pub fn reorg_window(mut self, blocks: usize) -> Self {
        self.config.reorg_window = blocks;
        self
    }

    /// Enable or disable event-id de-duplication.
    pub fn dedup(mut self, enabled: bool) -> Self {
        self.config.dedup = enabled;
        self
    }

    pub fn build_config(self) -> ProjectorConfig {
        self.config
    }
}
