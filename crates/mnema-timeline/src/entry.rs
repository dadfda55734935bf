use serde::{Deserialize, Serialize};

use mnema_core::{Fact, Timestamp};

/// What happened to a fact at a point on its timeline.
///
/// Variant order matters: on a timestamp tie, `Created` sorts before
/// `Invalidated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    Created,
    Invalidated,
}

/// One event on a derived timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: Timestamp,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub change_type: ChangeType,
}

impl TimelineEntry {
    fn at(fact: &Fact, timestamp: Timestamp, change_type: ChangeType) -> Self {
        Self {
            timestamp,
            subject: fact.subject.clone(),
            predicate: fact.predicate.clone(),
            object: fact.object.clone(),
            confidence: fact.confidence,
            change_type,
        }
    }

    /// Expand facts into timeline events: one `Created` per row at
    /// `valid_from`, plus one `Invalidated` at `valid_to` for closed rows.
    /// Sorted ascending by timestamp, `Created` first on ties.
    pub fn from_facts(facts: &[Fact]) -> Vec<Self> {
        let mut entries = Vec::with_capacity(facts.len() * 2);
        for fact in facts {
            entries.push(Self::at(fact, fact.valid_from, ChangeType::Created));
            if let Some(valid_to) = fact.valid_to {
                entries.push(Self::at(fact, valid_to, ChangeType::Invalidated));
            }
        }
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.change_type.cmp(&b.change_type))
                .then(a.subject.cmp(&b.subject))
                .then(a.predicate.cmp(&b.predicate))
        });
        entries
    }
}
