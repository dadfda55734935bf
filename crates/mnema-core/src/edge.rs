//! Directed edges between facts, with the same bitemporal shape as facts.

use serde::{Deserialize, Serialize};

use crate::types::{EdgeId, FactId, Metadata, Timestamp};

/// An edge row as persisted in the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub owner: Option<String>,
    pub source_id: FactId,
    pub target_id: FactId,
    pub relation_type: String,
    pub valid_from: Timestamp,
    pub valid_to: Option<Timestamp>,
    /// Edge strength in [0, 1].
    pub weight: f64,
    pub last_updated: Timestamp,
    /// Stored metadata blob: plaintext JSON or a `v1:` envelope.
    #[serde(default)]
    pub metadata: String,
}

impl EdgeRecord {
    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }

    pub fn valid_at(&self, at: Timestamp) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |to| to >= at)
    }
}

/// A hydrated edge with metadata decrypted and parsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub owner: Option<String>,
    pub source_id: FactId,
    pub target_id: FactId,
    pub relation_type: String,
    pub valid_from: Timestamp,
    pub valid_to: Option<Timestamp>,
    pub weight: f64,
    pub last_updated: Timestamp,
    pub metadata: Metadata,
}

impl Edge {
    pub fn from_record(record: EdgeRecord, metadata: Metadata) -> Self {
        Self {
            id: record.id,
            owner: record.owner,
            source_id: record.source_id,
            target_id: record.target_id,
            relation_type: record.relation_type,
            valid_from: record.valid_from,
            valid_to: record.valid_to,
            weight: record.weight,
            last_updated: record.last_updated,
            metadata,
        }
    }

    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }
}
