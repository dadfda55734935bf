//! Typed mutation events.
//!
//! Every payload carries the row id and owner so consumers (webhook
//! dispatcher, audit log) can enforce tenant isolation without a read-back.

use serde::{Deserialize, Serialize};

use mnema_core::{Edge, EdgeId, Fact, FactId, Metadata, Timestamp};

/// Event topics, one per mutation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    FactCreated,
    FactUpdated,
    FactDeleted,
    EdgeCreated,
    EdgeUpdated,
    EdgeDeleted,
}

/// A committed graph mutation.
///
/// `FactDeleted`/`EdgeDeleted` cover both lifecycles: `valid_to = Some(t)`
/// is an invalidation (the row closed at `t`), `valid_to = None` is a hard
/// delete (the row is gone).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GraphEvent {
    FactCreated {
        fact: Fact,
    },
    FactUpdated {
        id: FactId,
        owner: Option<String>,
        confidence: Option<f64>,
        metadata: Option<Metadata>,
        last_updated: Timestamp,
    },
    FactDeleted {
        id: FactId,
        owner: Option<String>,
        valid_to: Option<Timestamp>,
    },
    EdgeCreated {
        edge: Edge,
    },
    EdgeUpdated {
        id: EdgeId,
        owner: Option<String>,
        weight: Option<f64>,
        metadata: Option<Metadata>,
        last_updated: Timestamp,
    },
    EdgeDeleted {
        id: EdgeId,
        owner: Option<String>,
        valid_to: Option<Timestamp>,
    },
}

impl GraphEvent {
    pub fn topic(&self) -> Topic {
        match self {
            GraphEvent::FactCreated { .. } => Topic::FactCreated,
            GraphEvent::FactUpdated { .. } => Topic::FactUpdated,
            GraphEvent::FactDeleted { .. } => Topic::FactDeleted,
            GraphEvent::EdgeCreated { .. } => Topic::EdgeCreated,
            GraphEvent::EdgeUpdated { .. } => Topic::EdgeUpdated,
            GraphEvent::EdgeDeleted { .. } => Topic::EdgeDeleted,
        }
    }

    /// The tenant the mutated row belongs to.
    pub fn owner(&self) -> Option<&str> {
        match self {
            GraphEvent::FactCreated { fact } => fact.owner.as_deref(),
            GraphEvent::FactUpdated { owner, .. } => owner.as_deref(),
            GraphEvent::FactDeleted { owner, .. } => owner.as_deref(),
            GraphEvent::EdgeCreated { edge } => edge.owner.as_deref(),
            GraphEvent::EdgeUpdated { owner, .. } => owner.as_deref(),
            GraphEvent::EdgeDeleted { owner, .. } => owner.as_deref(),
        }
    }
}
