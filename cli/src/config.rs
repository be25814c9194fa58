//! The `--config` file: one JSON document covering every section.
//!
//! ```json
//! {
//!   "database": "./bridge.db",
//!   "projector": { "id": "bridge-mapper", "reorg_window": 64 },
//!   "ingest": { "from_block": 19000000, "confirmation_depth": 12 },
//!   "log": { "level": "info", "json": true }
//! }
//! ```
//!
//! Missing sections and fields take their defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use chainproject_core::ProjectorConfig;
use chainproject_ingest::IngestConfig;

use crate::logging::LogConfig;

pub const DEFAULT_DATABASE: &str = "./chainproject.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// SQLite database file.
    pub database: String,
    pub projector: ProjectorConfig,
    pub ingest: IngestConfig,
    pub log: LogConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.into(),
            projector: ProjectorConfig::default(),
            ingest: IngestConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        let config = CliConfig::load(None).unwrap();
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert_eq!(config.projector.reorg_window, 128);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = CliConfig::from_json(
            r#"{"projector": {"id": "bridge-mapper"}, "ingest": {"confirmation_depth": 0}}"#,
        )
        .unwrap();
        assert_eq!(config.projector.id, "bridge-mapper");
        assert!(config.projector.dedup);
        assert_eq!(config.ingest.confirmation_depth, 0);
        assert_eq!(config.ingest.batch_size, 1000);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let err = CliConfig::load(Some(Path::new("/nonexistent/chainproject.json"))).unwrap_err();
        assert!(err.to_string().contains("cannot read config file"));
    }
}
