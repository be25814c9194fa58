//! Shared types: chain positions, decoded events, and the Mapping record.

use serde::{Deserialize, Serialize};

// ─── ChainPosition ────────────────────────────────────────────────────────────

/// A point in the ledger's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainPosition {
    /// Block number.
    pub block_number: u64,
    /// Block hash (`0x…`).
    pub block_hash: String,
}

impl ChainPosition {
    pub fn new(block_number: u64, block_hash: impl Into<String>) -> Self {
        Self {
            block_number,
            block_hash: block_hash.into(),
        }
    }
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// Identity of a log within the chain, used for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub tx_hash: String,
    pub log_index: u32,
}

/// A decoded bridge-mapper event together with where it was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Block the log was included in.
    pub position: ChainPosition,
    /// Transaction hash.
    pub tx_hash: String,
    /// Log index within the block.
    #[serde(default)]
    pub log_index: u32,
    /// The decoded event body.
    pub payload: EventPayload,
}

impl Event {
    pub fn new(position: ChainPosition, tx_hash: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            position,
            tx_hash: tx_hash.into(),
            log_index: 0,
            payload,
        }
    }

    /// Set the log index.
    pub fn with_log_index(mut self, log_index: u32) -> Self {
        self.log_index = log_index;
        self
    }

    pub fn id(&self) -> EventId {
        EventId {
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.position.block_number
    }
}

/// The event kinds emitted by the bridge mapper contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    /// `BridgeMappingUpdated`: a token pair's bridge configuration was set.
    MappingUpdated(MappingUpdated),
    /// `EternalOwnershipTransferred`: contract ownership changed.
    OwnershipTransferred(OwnershipTransferred),
}

impl EventPayload {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MappingUpdated(_) => "MappingUpdated",
            Self::OwnershipTransferred(_) => "OwnershipTransferred",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingUpdated {
    /// Sender of the transaction that emitted the event; the record id.
    pub sender: String,
    pub key: String,
    pub foreign_token: String,
    pub home_token: String,
    pub foreign_bridge: String,
    pub home_bridge: String,
    pub foreign_start_block: u64,
    pub home_start_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransferred {
    pub previous_owner: String,
    pub new_owner: String,
}

// ─── MappingRecord ────────────────────────────────────────────────────────────

/// The projected "Mapping" entity, keyed by the normalized sender address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: String,
    pub key: String,
    pub foreign_token: String,
    pub home_token: String,
    pub foreign_bridge: String,
    pub home_bridge: String,
    pub foreign_start_block: u64,
    pub home_start_block: u64,
}

impl MappingRecord {
    /// A record with every value field at its default.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Overwrite the fields the patch sets; leave the rest untouched.
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(v) = &patch.key {
            self.key.clone_from(v);
        }
        if let Some(v) = &patch.foreign_token {
            self.foreign_token.clone_from(v);
        }
        if let Some(v) = &patch.home_token {
            self.home_token.clone_from(v);
        }
        if let Some(v) = &patch.foreign_bridge {
            self.foreign_bridge.clone_from(v);
        }
        if let Some(v) = &patch.home_bridge {
            self.home_bridge.clone_from(v);
        }
        if let Some(v) = patch.foreign_start_block {
            self.foreign_start_block = v;
        }
        if let Some(v) = patch.home_start_block {
            self.home_start_block = v;
        }
    }
}

/// A partial update to a [`MappingRecord`]. `None` keeps the prior value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    pub key: Option<String>,
    pub foreign_token: Option<String>,
    pub home_token: Option<String>,
    pub foreign_bridge: Option<String>,
    pub home_bridge: Option<String>,
    pub foreign_start_block: Option<u64>,
    pub home_start_block: Option<u64>,
}

impl RecordPatch {
    /// Returns `true` if the patch sets no field.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<&MappingUpdated> for RecordPatch {
    fn from(ev: &MappingUpdated) -> Self {
        Self {
            key: Some(ev.key.clone()),
            foreign_token: Some(ev.foreign_token.clone()),
            home_token: Some(ev.home_token.clone()),
            foreign_bridge: Some(ev.foreign_bridge.clone()),
            home_bridge: Some(ev.home_bridge.clone()),
            foreign_start_block: Some(ev.foreign_start_block),
            home_start_block: Some(ev.home_start_block),
        }
    }
}

/// Normalize an address into a record id: trimmed, lowercase, `0x`-prefixed.
pub fn record_id(address: &str) -> String {
    let trimmed = address.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", hex.to_ascii_lowercase())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
