//! Bitemporal fact rows.
//!
//! A [`FactRecord`] is the persisted form: its `metadata` column holds either
//! a plaintext JSON blob or a `v1:` encryption envelope, exactly as stored.
//! A [`Fact`] is the hydrated form handed to callers, with metadata decrypted
//! and parsed. History is preserved by closing validity intervals, never by
//! overwriting rows.

use serde::{Deserialize, Serialize};

use crate::types::{FactId, Metadata, Timestamp};

/// A fact row as persisted in the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactRecord {
    pub id: FactId,
    /// Owning tenant; `None` marks a global row (distinct from every tenant).
    pub owner: Option<String>,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Start of validity (inclusive, ms).
    pub valid_from: Timestamp,
    /// End of validity; `None` = still active.
    pub valid_to: Option<Timestamp>,
    /// Belief strength in [0, 1].
    pub confidence: f64,
    pub last_updated: Timestamp,
    /// Stored metadata blob: plaintext JSON or a `v1:` envelope.
    #[serde(default)]
    pub metadata: String,
}

impl FactRecord {
    /// True while `valid_to` is open.
    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }

    /// True if the row was believed at instant `at`.
    pub fn valid_at(&self, at: Timestamp) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |to| to >= at)
    }

    /// True if the validity interval intersects `[from, to]`.
    pub fn overlaps(&self, from: Timestamp, to: Timestamp) -> bool {
        self.valid_from <= to && self.valid_to.map_or(true, |vt| vt >= from)
    }
}

/// A hydrated fact: the persisted row with metadata decrypted and parsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub owner: Option<String>,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub valid_from: Timestamp,
    pub valid_to: Option<Timestamp>,
    pub confidence: f64,
    pub last_updated: Timestamp,
    pub metadata: Metadata,
}

impl Fact {
    /// Assemble the hydrated view from a persisted row and its decrypted map.
    pub fn from_record(record: FactRecord, metadata: Metadata) -> Self {
        Self {
            id: record.id,
            owner: record.owner,
            subject: record.subject,
            predicate: record.predicate,
            object: record.object,
            valid_from: record.valid_from,
            valid_to: record.valid_to,
            confidence: record.confidence,
            last_updated: record.last_updated,
            metadata,
        }
    }

    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }
}
