//! Timeline assembly and change analytics.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use mnema_core::{now_ms, Fact, MnemaError, OwnerScope, Timestamp, MS_PER_DAY};
use mnema_query::QueryEngine;

use crate::entry::TimelineEntry;

/// A predicate whose value differs between two points in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactChange {
    pub before: Fact,
    pub after: Fact,
}

/// The outcome of comparing a subject's state at two instants.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimePointDiff {
    /// Predicates present at t2 but not t1.
    pub added: Vec<Fact>,
    /// Predicates present at t1 but not t2.
    pub removed: Vec<Fact>,
    /// Predicates present at both with a differing object or row id.
    pub changed: Vec<FactChange>,
    /// Predicates present at both, identical object and row id.
    pub unchanged: Vec<Fact>,
}

/// How often one (owner, subject, predicate) key has changed recently.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeFrequency {
    pub version_count: usize,
    pub total_duration_ms: i64,
    pub avg_duration_ms: f64,
    pub change_rate_per_day: f64,
}

/// Aggregate over one (subject, predicate) group: how many versions it has
/// accumulated and how confident they were on average.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolatileGroup {
    pub subject: String,
    pub predicate: String,
    pub version_count: usize,
    pub avg_confidence: f64,
}

/// Derives chronological views and change aggregates from the query layer.
pub struct TimelineEngine {
    query: Arc<QueryEngine>,
}

impl TimelineEngine {
    pub fn new(query: Arc<QueryEngine>) -> Self {
        Self { query }
    }

    // ── Timelines ─────────────────────────────────────────────────────────────

    /// Every lifecycle event for a subject, oldest first.
    pub fn get_subject_timeline(
        &self,
        subject: &str,
        predicate: Option<&str>,
        owner: &OwnerScope,
    ) -> Result<Vec<TimelineEntry>, MnemaError> {
        let facts = self.query.history_for_subject(subject, predicate, owner)?;
        Ok(TimelineEntry::from_facts(&facts))
    }

    /// Every lifecycle event for a predicate across subjects, optionally
    /// clipped to `[from, to]`.
    pub fn get_predicate_timeline(
        &self,
        predicate: &str,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        owner: &OwnerScope,
    ) -> Result<Vec<TimelineEntry>, MnemaError> {
        let facts = self.query.history_for_predicate(predicate, owner)?;
        let mut entries = TimelineEntry::from_facts(&facts);
        if from.is_some() || to.is_some() {
            let lo = from.unwrap_or(Timestamp::MIN);
            let hi = to.unwrap_or(Timestamp::MAX);
            entries.retain(|e| e.timestamp >= lo && e.timestamp <= hi);
        }
        Ok(entries)
    }

    /// Only events whose `created` or `invalidated` timestamp falls inside
    /// `[from, to]`. Rows whose interval merely straddles the window are
    /// excluded; `query_facts_in_range` serves overlap semantics.
    pub fn get_changes_in_window(
        &self,
        from: Timestamp,
        to: Timestamp,
        subject: Option<&str>,
        owner: &OwnerScope,
    ) -> Result<Vec<TimelineEntry>, MnemaError> {
        let facts = match subject {
            Some(subject) => self.query.history_for_subject(subject, None, owner)?,
            // Every row with an endpoint inside the window also overlaps it,
            // so the range query is a sound candidate set.
            None => self.query.query_facts_in_range(from, to, None, None, owner)?,
        };
        let mut entries = TimelineEntry::from_facts(&facts);
        entries.retain(|e| e.timestamp >= from && e.timestamp <= to);
        Ok(entries)
    }

    // ── Diffs ─────────────────────────────────────────────────────────────────

    /// Compare what was believed about `subject` at `t1` against `t2`.
    pub fn compare_time_points(
        &self,
        subject: &str,
        t1: Timestamp,
        t2: Timestamp,
        owner: &OwnerScope,
    ) -> Result<TimePointDiff, MnemaError> {
        let before = self.state_at(subject, t1, owner)?;
        let after = self.state_at(subject, t2, owner)?;

        let mut diff = TimePointDiff::default();
        for (predicate, after_fact) in &after {
            match before.get(predicate) {
                None => diff.added.push(after_fact.clone()),
                Some(before_fact) => {
                    if before_fact.id == after_fact.id && before_fact.object == after_fact.object {
                        diff.unchanged.push(after_fact.clone());
                    } else {
                        diff.changed.push(FactChange {
                            before: before_fact.clone(),
                            after: after_fact.clone(),
                        });
                    }
                }
            }
        }
        for (predicate, before_fact) in &before {
            if !after.contains_key(predicate) {
                diff.removed.push(before_fact.clone());
            }
        }
        Ok(diff)
    }

    /// The believed state of a subject at one instant, keyed by predicate.
    /// Cardinality-1 makes the value unique; if a violation slipped in, the
    /// highest-confidence row wins (query order).
    fn state_at(
        &self,
        subject: &str,
        at: Timestamp,
        owner: &OwnerScope,
    ) -> Result<BTreeMap<String, Fact>, MnemaError> {
        let facts = self.query.query_facts_at_time(&mnema_query::FactQuery {
            subject: Some(subject.to_string()),
            at: Some(at),
            owner: owner.clone(),
            ..Default::default()
        })?;
        let mut state = BTreeMap::new();
        for fact in facts {
            state.entry(fact.predicate.clone()).or_insert(fact);
        }
        Ok(state)
    }

    // ── Aggregates ────────────────────────────────────────────────────────────

    /// Versions of one key that started inside the trailing window, with
    /// their average lifetime and change rate.
    pub fn get_change_frequency(
        &self,
        subject: &str,
        predicate: &str,
        window_days: i64,
        owner: &OwnerScope,
    ) -> Result<ChangeFrequency, MnemaError> {
        if window_days <= 0 {
            return Err(MnemaError::NonPositiveWindow { got: window_days });
        }
        let now = now_ms();
        let cutoff = now - window_days * MS_PER_DAY;
        let versions: Vec<Fact> = self
            .query
            .history_for_subject(subject, Some(predicate), owner)?
            .into_iter()
            .filter(|f| f.valid_from >= cutoff)
            .collect();

        let mut total_duration_ms = 0i64;
        for fact in &versions {
            total_duration_ms += match fact.valid_to {
                Some(valid_to) => valid_to - fact.valid_from,
                None => now - fact.valid_from,
            };
        }
        let count = versions.len();
        Ok(ChangeFrequency {
            version_count: count,
            total_duration_ms,
            avg_duration_ms: if count == 0 {
                0.0
            } else {
                total_duration_ms as f64 / count as f64
            },
            change_rate_per_day: count as f64 / window_days as f64,
        })
    }

    /// Keys that have churned: groups with more than one version, most
    /// versions first, least confident first among equals.
    pub fn get_volatile_facts(
        &self,
        subject: Option<&str>,
        limit: usize,
        owner: &OwnerScope,
    ) -> Result<Vec<VolatileGroup>, MnemaError> {
        let facts = match subject {
            Some(subject) => self.query.history_for_subject(subject, None, owner)?,
            None => self.query.full_history(owner)?,
        };

        let mut groups: BTreeMap<(String, String), (usize, f64)> = BTreeMap::new();
        for fact in &facts {
            let entry = groups
                .entry((fact.subject.clone(), fact.predicate.clone()))
                .or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += fact.confidence;
        }

        let mut volatile: Vec<VolatileGroup> = groups
            .into_iter()
            .filter(|(_, (count, _))| *count > 1)
            .map(|((subject, predicate), (count, sum))| VolatileGroup {
                subject,
                predicate,
                version_count: count,
                avg_confidence: sum / count as f64,
            })
            .collect();
        volatile.sort_by(|a, b| {
            b.version_count
                .cmp(&a.version_count)
                .then(a.avg_confidence.total_cmp(&b.avg_confidence))
                .then(a.subject.cmp(&b.subject))
                .then(a.predicate.cmp(&b.predicate))
        });
        volatile.truncate(limit);
        Ok(volatile)
    }
}
