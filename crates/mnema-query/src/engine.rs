//! The read engine.
//!
//! Every query filters on the owner tri-state, applies the validity
//! predicate, sorts with a total order (`id` is the final tiebreak), and
//! hydrates only the rows it returns.

use std::sync::Arc;
use tracing::warn;

use mnema_core::{
    now_ms, Edge, EdgeRecord, Fact, FactId, FactRecord, MnemaError, OwnerScope, Timestamp,
};
use mnema_crypto::{open_metadata, CryptoProvider};
use mnema_store::GraphDb;

use crate::cache::HydrationCache;

// ── Query parameter structs ──────────────────────────────────────────────────

/// Filters for `query_facts_at_time`. Unset fields match everything.
#[derive(Clone, Debug)]
pub struct FactQuery {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    /// Point in time to evaluate validity at; `None` = now.
    pub at: Option<Timestamp>,
    pub min_confidence: f64,
    pub owner: OwnerScope,
}

impl Default for FactQuery {
    fn default() -> Self {
        Self {
            subject: None,
            predicate: None,
            object: None,
            at: None,
            min_confidence: 0.0,
            owner: OwnerScope::Any,
        }
    }
}

/// Filters for `query_edges`.
#[derive(Clone, Debug)]
pub struct EdgeQuery {
    pub source_id: Option<FactId>,
    pub target_id: Option<FactId>,
    pub relation_type: Option<String>,
    pub at: Option<Timestamp>,
    pub owner: OwnerScope,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EdgeQuery {
    fn default() -> Self {
        Self {
            source_id: None,
            target_id: None,
            relation_type: None,
            at: None,
            owner: OwnerScope::Any,
            limit: usize::MAX,
            offset: 0,
        }
    }
}

/// Which columns `search_facts` matches against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchScope {
    Subject,
    Predicate,
    Object,
    All,
}

/// One hop of graph traversal: a neighbouring fact and the edge that led
/// to it.
#[derive(Clone, Debug)]
pub struct RelatedFact {
    pub fact: Fact,
    pub relation_type: String,
    pub weight: f64,
}

// ── QueryEngine ──────────────────────────────────────────────────────────────

pub struct QueryEngine {
    db: Arc<GraphDb>,
    crypto: Arc<CryptoProvider>,
    cache: HydrationCache,
}

impl QueryEngine {
    pub fn new(db: Arc<GraphDb>, crypto: Arc<CryptoProvider>, cache_size: usize) -> Self {
        Self {
            db,
            crypto,
            cache: HydrationCache::new(cache_size),
        }
    }

    pub fn cache(&self) -> &HydrationCache {
        &self.cache
    }

    // ── Hydration ─────────────────────────────────────────────────────────────

    fn hydrate_fact(&self, record: FactRecord) -> Result<Fact, MnemaError> {
        let key = (record.id, record.last_updated);
        if let Some(fact) = self.cache.get_fact(&key) {
            return Ok(fact);
        }
        let metadata = open_metadata(&self.crypto, &record.metadata)?;
        let fact = Fact::from_record(record, metadata);
        self.cache.put_fact(key, fact.clone());
        Ok(fact)
    }

    fn hydrate_facts(&self, records: Vec<FactRecord>) -> Result<Vec<Fact>, MnemaError> {
        records.into_iter().map(|r| self.hydrate_fact(r)).collect()
    }

    fn hydrate_edge(&self, record: EdgeRecord) -> Result<Edge, MnemaError> {
        let key = (record.id, record.last_updated);
        if let Some(edge) = self.cache.get_edge(&key) {
            return Ok(edge);
        }
        let metadata = open_metadata(&self.crypto, &record.metadata)?;
        let edge = Edge::from_record(record, metadata);
        self.cache.put_edge(key, edge.clone());
        Ok(edge)
    }

    // ── Candidate selection ───────────────────────────────────────────────────

    /// Rows that could match a subject/predicate filter. A fully-keyed query
    /// under a concrete scope uses the (owner, subject, predicate) index;
    /// anything else scans.
    fn candidate_facts(
        &self,
        owner: &OwnerScope,
        subject: Option<&str>,
        predicate: Option<&str>,
    ) -> Result<Vec<FactRecord>, MnemaError> {
        match (owner, subject, predicate) {
            (OwnerScope::Global, Some(s), Some(p)) => self.db.facts_for_key(&None, s, p),
            (OwnerScope::Owner(id), Some(s), Some(p)) => {
                self.db.facts_for_key(&Some(id.clone()), s, p)
            }
            _ => self.db.scan_facts(),
        }
    }

    fn sort_facts(records: &mut [FactRecord]) {
        records.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(b.valid_from.cmp(&a.valid_from))
                .then(a.id.cmp(&b.id))
        });
    }

    // ── Fact queries ──────────────────────────────────────────────────────────

    /// All facts believed at `q.at`, ordered by confidence then recency.
    pub fn query_facts_at_time(&self, q: &FactQuery) -> Result<Vec<Fact>, MnemaError> {
        let at = q.at.unwrap_or_else(now_ms);
        let mut records: Vec<FactRecord> = self
            .candidate_facts(&q.owner, q.subject.as_deref(), q.predicate.as_deref())?
            .into_iter()
            .filter(|r| {
                r.valid_at(at)
                    && q.owner.matches(&r.owner)
                    && q.subject.as_deref().map_or(true, |s| r.subject == s)
                    && q.predicate.as_deref().map_or(true, |p| r.predicate == p)
                    && q.object.as_deref().map_or(true, |o| r.object == o)
                    && r.confidence >= q.min_confidence
            })
            .collect();
        Self::sort_facts(&mut records);
        self.hydrate_facts(records)
    }

    /// The single fact currently (or at `at`) held for a subject/predicate.
    pub fn get_current_fact(
        &self,
        subject: &str,
        predicate: &str,
        owner: &OwnerScope,
        at: Option<Timestamp>,
    ) -> Result<Option<Fact>, MnemaError> {
        let mut records: Vec<FactRecord> = self
            .candidate_facts(owner, Some(subject), Some(predicate))?
            .into_iter()
            .filter(|r| {
                r.subject == subject
                    && r.predicate == predicate
                    && owner.matches(&r.owner)
                    && match at {
                        Some(at) => r.valid_at(at),
                        None => r.is_active(),
                    }
            })
            .collect();
        // Newest interval wins; id as the final tiebreak.
        records.sort_by(|a, b| b.valid_from.cmp(&a.valid_from).then(a.id.cmp(&b.id)));
        match records.into_iter().next() {
            Some(record) => Ok(Some(self.hydrate_fact(record)?)),
            None => Ok(None),
        }
    }

    /// Facts whose validity interval overlaps `[from, to]`, or which started
    /// inside it. The dual clause is deliberate: it catches both *was valid
    /// during* and *started during*.
    pub fn query_facts_in_range(
        &self,
        from: Timestamp,
        to: Timestamp,
        subject: Option<&str>,
        predicate: Option<&str>,
        owner: &OwnerScope,
    ) -> Result<Vec<Fact>, MnemaError> {
        let mut records: Vec<FactRecord> = self
            .candidate_facts(owner, subject, predicate)?
            .into_iter()
            .filter(|r| {
                (r.overlaps(from, to) || (r.valid_from >= from && r.valid_from <= to))
                    && owner.matches(&r.owner)
                    && subject.map_or(true, |s| r.subject == s)
                    && predicate.map_or(true, |p| r.predicate == p)
            })
            .collect();
        Self::sort_facts(&mut records);
        self.hydrate_facts(records)
    }

    /// Facts for one (owner, subject, predicate) key valid at `at`. More
    /// than one result means cardinality-1 was violated by a writer that
    /// bypassed the engine.
    pub fn find_conflicting_facts(
        &self,
        subject: &str,
        predicate: &str,
        at: Timestamp,
        owner: &OwnerScope,
    ) -> Result<Vec<Fact>, MnemaError> {
        let mut records: Vec<FactRecord> = self
            .candidate_facts(owner, Some(subject), Some(predicate))?
            .into_iter()
            .filter(|r| {
                r.subject == subject
                    && r.predicate == predicate
                    && owner.matches(&r.owner)
                    && r.valid_at(at)
            })
            .collect();
        if records.len() > 1 {
            warn!(
                subject,
                predicate,
                count = records.len(),
                "multiple facts valid at the same instant for one key"
            );
        }
        records.sort_by(|a, b| b.valid_from.cmp(&a.valid_from).then(a.id.cmp(&b.id)));
        self.hydrate_facts(records)
    }

    /// Everything known about a subject: the full history, or only the rows
    /// valid at `at`.
    pub fn get_facts_by_subject(
        &self,
        subject: &str,
        at: Option<Timestamp>,
        include_historical: bool,
        owner: &OwnerScope,
        limit: usize,
    ) -> Result<Vec<Fact>, MnemaError> {
        let at = at.unwrap_or_else(now_ms);
        let mut records: Vec<FactRecord> = self
            .db
            .scan_facts()?
            .into_iter()
            .filter(|r| {
                r.subject == subject
                    && owner.matches(&r.owner)
                    && (include_historical || r.valid_at(at))
            })
            .collect();
        records.sort_by(|a, b| {
            a.predicate
                .cmp(&b.predicate)
                .then(b.valid_from.cmp(&a.valid_from))
                .then(a.id.cmp(&b.id))
        });
        records.truncate(limit);
        self.hydrate_facts(records)
    }

    /// Substring search over one or all of subject/predicate/object.
    pub fn search_facts(
        &self,
        pattern: &str,
        scope: SearchScope,
        at: Option<Timestamp>,
        limit: usize,
        owner: &OwnerScope,
    ) -> Result<Vec<Fact>, MnemaError> {
        if pattern.is_empty() {
            return Err(MnemaError::EmptyField { field: "pattern" });
        }
        let mut records: Vec<FactRecord> = self
            .db
            .scan_facts()?
            .into_iter()
            .filter(|r| {
                let hit = match scope {
                    SearchScope::Subject => r.subject.contains(pattern),
                    SearchScope::Predicate => r.predicate.contains(pattern),
                    SearchScope::Object => r.object.contains(pattern),
                    SearchScope::All => {
                        r.subject.contains(pattern)
                            || r.predicate.contains(pattern)
                            || r.object.contains(pattern)
                    }
                };
                hit && owner.matches(&r.owner) && at.map_or(true, |at| r.valid_at(at))
            })
            .collect();
        Self::sort_facts(&mut records);
        records.truncate(limit);
        self.hydrate_facts(records)
    }

    // ── Traversal ─────────────────────────────────────────────────────────────

    /// 1-hop join: edges leaving `fact_id` that are valid at `at`, joined to
    /// target facts also valid at `at`. Strongest edges first, then target
    /// confidence.
    pub fn get_related_facts(
        &self,
        fact_id: FactId,
        relation_type: Option<&str>,
        at: Option<Timestamp>,
        owner: &OwnerScope,
    ) -> Result<Vec<RelatedFact>, MnemaError> {
        let at = at.unwrap_or_else(now_ms);
        let mut joined: Vec<(EdgeRecord, FactRecord)> = Vec::new();
        for edge in self.db.edges_from(&fact_id)? {
            if !edge.valid_at(at)
                || !owner.matches(&edge.owner)
                || relation_type.map_or(false, |rt| edge.relation_type != rt)
            {
                continue;
            }
            if let Some(target) = self.db.get_fact(&edge.target_id)? {
                if target.valid_at(at) && owner.matches(&target.owner) {
                    joined.push((edge, target));
                }
            }
        }
        joined.sort_by(|(ea, fa), (eb, fb)| {
            eb.weight
                .total_cmp(&ea.weight)
                .then(fb.confidence.total_cmp(&fa.confidence))
                .then(ea.id.cmp(&eb.id))
        });
        joined
            .into_iter()
            .map(|(edge, target)| {
                Ok(RelatedFact {
                    fact: self.hydrate_fact(target)?,
                    relation_type: edge.relation_type,
                    weight: edge.weight,
                })
            })
            .collect()
    }

    /// Edges valid at `q.at` filtered by the supplied keys, strongest first.
    pub fn query_edges(&self, q: &EdgeQuery) -> Result<Vec<Edge>, MnemaError> {
        let at = q.at.unwrap_or_else(now_ms);
        let candidates = match (&q.source_id, &q.target_id) {
            (Some(source), _) => self.db.edges_from(source)?,
            (None, Some(target)) => self.db.edges_to(target)?,
            (None, None) => self.db.scan_edges()?,
        };
        let mut records: Vec<EdgeRecord> = candidates
            .into_iter()
            .filter(|r| {
                r.valid_at(at)
                    && q.owner.matches(&r.owner)
                    && q.source_id.map_or(true, |s| r.source_id == s)
                    && q.target_id.map_or(true, |t| r.target_id == t)
                    && q.relation_type
                        .as_deref()
                        .map_or(true, |rt| r.relation_type == rt)
            })
            .collect();
        records.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.id.cmp(&b.id)));
        records
            .into_iter()
            .skip(q.offset)
            .take(q.limit)
            .map(|r| self.hydrate_edge(r))
            .collect()
    }

    // ── History accessors (timeline layer) ────────────────────────────────────

    /// Every version ever written for a subject, optionally narrowed to one
    /// predicate. No validity filter; ascending `valid_from`.
    pub fn history_for_subject(
        &self,
        subject: &str,
        predicate: Option<&str>,
        owner: &OwnerScope,
    ) -> Result<Vec<Fact>, MnemaError> {
        let mut records: Vec<FactRecord> = self
            .candidate_facts(owner, Some(subject), predicate)?
            .into_iter()
            .filter(|r| {
                r.subject == subject
                    && owner.matches(&r.owner)
                    && predicate.map_or(true, |p| r.predicate == p)
            })
            .collect();
        records.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.id.cmp(&b.id)));
        self.hydrate_facts(records)
    }

    /// Every version in scope, across all subjects and predicates.
    pub fn full_history(&self, owner: &OwnerScope) -> Result<Vec<Fact>, MnemaError> {
        let mut records: Vec<FactRecord> = self
            .db
            .scan_facts()?
            .into_iter()
            .filter(|r| owner.matches(&r.owner))
            .collect();
        records.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.id.cmp(&b.id)));
        self.hydrate_facts(records)
    }

    /// Every version ever written for a predicate, across subjects.
    pub fn history_for_predicate(
        &self,
        predicate: &str,
        owner: &OwnerScope,
    ) -> Result<Vec<Fact>, MnemaError> {
        let mut records: Vec<FactRecord> = self
            .db
            .scan_facts()?
            .into_iter()
            .filter(|r| r.predicate == predicate && owner.matches(&r.owner))
            .collect();
        records.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.id.cmp(&b.id)));
        self.hydrate_facts(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_core::{CancelToken, EngineConfig, Metadata};
    use mnema_events::EventBus;
    use mnema_store::{EdgeInput, FactInput, FactPatch, GraphStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: GraphStore,
        query: QueryEngine,
        cancel: CancelToken,
    }

    fn fixture_with(crypto: CryptoProvider) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(GraphDb::open(dir.path()).expect("open sled"));
        let crypto = Arc::new(crypto);
        let store = GraphStore::new(
            Arc::clone(&db),
            Arc::clone(&crypto),
            Arc::new(EventBus::new()),
            0.01,
        );
        let query = QueryEngine::new(db, crypto, 64);
        Fixture {
            _dir: dir,
            store,
            query,
            cancel: CancelToken::new(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CryptoProvider::Noop)
    }

    fn fact(owner: Option<&str>, s: &str, p: &str, o: &str, valid_from: i64) -> FactInput {
        FactInput {
            owner: owner.map(String::from),
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
            valid_from,
            confidence: 0.8,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn at_time_query_applies_the_validity_predicate() {
        let fx = fixture();
        fx.store
            .insert_fact(fact(Some("u1"), "John", "location", "NY", 1000), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(Some("u1"), "John", "location", "Paris", 5000), &fx.cancel)
            .unwrap();

        let q = FactQuery {
            subject: Some("John".into()),
            predicate: Some("location".into()),
            owner: OwnerScope::Owner("u1".into()),
            ..Default::default()
        };
        let at_3000 = fx
            .query
            .query_facts_at_time(&FactQuery {
                at: Some(3000),
                ..q.clone()
            })
            .unwrap();
        assert_eq!(at_3000.len(), 1);
        assert_eq!(at_3000[0].object, "NY");

        let at_7000 = fx
            .query
            .query_facts_at_time(&FactQuery {
                at: Some(7000),
                ..q
            })
            .unwrap();
        assert_eq!(at_7000.len(), 1);
        assert_eq!(at_7000[0].object, "Paris");
    }

    #[test]
    fn at_time_orders_by_confidence_then_recency() {
        let fx = fixture();
        for (subject, confidence, valid_from) in
            [("a", 0.5, 100), ("b", 0.9, 50), ("c", 0.9, 200)]
        {
            let mut input = fact(None, subject, "p", "o", valid_from);
            input.confidence = confidence;
            fx.store.insert_fact(input, &fx.cancel).unwrap();
        }
        let results = fx
            .query
            .query_facts_at_time(&FactQuery {
                at: Some(1000),
                ..Default::default()
            })
            .unwrap();
        let subjects: Vec<&str> = results.iter().map(|f| f.subject.as_str()).collect();
        assert_eq!(subjects, vec!["c", "b", "a"]);
    }

    #[test]
    fn min_confidence_filters_weak_rows() {
        let fx = fixture();
        let mut weak = fact(None, "s1", "p", "o", 0);
        weak.confidence = 0.2;
        fx.store.insert_fact(weak, &fx.cancel).unwrap();
        fx.store.insert_fact(fact(None, "s2", "p", "o", 0), &fx.cancel).unwrap();

        let results = fx
            .query
            .query_facts_at_time(&FactQuery {
                min_confidence: 0.5,
                at: Some(100),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subject, "s2");
    }

    #[test]
    fn current_fact_prefers_the_open_row_and_honours_at() {
        let fx = fixture();
        fx.store
            .insert_fact(fact(None, "John", "location", "NY", 1000), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(None, "John", "location", "Paris", 5000), &fx.cancel)
            .unwrap();

        let current = fx
            .query
            .get_current_fact("John", "location", &OwnerScope::Global, None)
            .unwrap()
            .expect("active row");
        assert_eq!(current.object, "Paris");

        let then = fx
            .query
            .get_current_fact("John", "location", &OwnerScope::Global, Some(2000))
            .unwrap()
            .expect("historical row");
        assert_eq!(then.object, "NY");

        assert!(fx
            .query
            .get_current_fact("John", "employer", &OwnerScope::Global, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn range_query_is_a_superset_of_at_time() {
        let fx = fixture();
        fx.store
            .insert_fact(fact(None, "John", "location", "NY", 1000), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(None, "John", "location", "Paris", 5000), &fx.cancel)
            .unwrap();

        let at = fx
            .query
            .query_facts_at_time(&FactQuery {
                at: Some(3000),
                ..Default::default()
            })
            .unwrap();
        let range = fx
            .query
            .query_facts_in_range(3000, 3000, None, None, &OwnerScope::Any)
            .unwrap();
        for f in &at {
            assert!(range.iter().any(|r| r.id == f.id), "range must contain {f:?}");
        }
        // Both rows overlap [0, 10_000].
        let wide = fx
            .query
            .query_facts_in_range(0, 10_000, None, None, &OwnerScope::Any)
            .unwrap();
        assert_eq!(wide.len(), 2);
    }

    #[test]
    fn conflicting_facts_is_at_most_one_under_normal_operation() {
        let fx = fixture();
        fx.store
            .insert_fact(fact(None, "s", "p", "a", 1000), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(None, "s", "p", "b", 2000), &fx.cancel)
            .unwrap();
        let conflicts = fx
            .query
            .find_conflicting_facts("s", "p", 3000, &OwnerScope::Global)
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].object, "b");
    }

    #[test]
    fn by_subject_historical_returns_everything_ordered_by_predicate() {
        let fx = fixture();
        fx.store
            .insert_fact(fact(None, "John", "location", "NY", 1000), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(None, "John", "location", "Paris", 5000), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(None, "John", "employer", "Acme", 2000), &fx.cancel)
            .unwrap();

        let history = fx
            .query
            .get_facts_by_subject("John", None, true, &OwnerScope::Any, 100)
            .unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].predicate, "employer");
        // Within a predicate, newest interval first.
        assert_eq!(history[1].object, "Paris");
        assert_eq!(history[2].object, "NY");

        let now_view = fx
            .query
            .get_facts_by_subject("John", None, false, &OwnerScope::Any, 100)
            .unwrap();
        assert_eq!(now_view.len(), 2);
    }

    #[test]
    fn search_matches_the_requested_column_only() {
        let fx = fixture();
        fx.store
            .insert_fact(fact(None, "paris-office", "houses", "team", 0), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(None, "John", "location", "Paris", 0), &fx.cancel)
            .unwrap();

        let by_object = fx
            .query
            .search_facts("Paris", SearchScope::Object, None, 10, &OwnerScope::Any)
            .unwrap();
        assert_eq!(by_object.len(), 1);
        assert_eq!(by_object[0].subject, "John");

        let all = fx
            .query
            .search_facts("aris", SearchScope::All, None, 10, &OwnerScope::Any)
            .unwrap();
        assert_eq!(all.len(), 2);

        assert!(fx
            .query
            .search_facts("", SearchScope::All, None, 10, &OwnerScope::Any)
            .is_err());
    }

    #[test]
    fn related_facts_one_hop_strongest_edge_first() {
        let fx = fixture();
        let hub = fx
            .store
            .insert_fact(fact(None, "hub", "is", "hub", 0), &fx.cancel)
            .unwrap();
        let near = fx
            .store
            .insert_fact(fact(None, "near", "is", "near", 0), &fx.cancel)
            .unwrap();
        let far = fx
            .store
            .insert_fact(fact(None, "far", "is", "far", 0), &fx.cancel)
            .unwrap();
        for (target, weight) in [(near, 0.9), (far, 0.3)] {
            fx.store
                .insert_edge(
                    EdgeInput {
                        owner: None,
                        source_id: hub,
                        target_id: target,
                        relation_type: "colocated".into(),
                        valid_from: 0,
                        weight,
                        metadata: Metadata::new(),
                    },
                    &fx.cancel,
                )
                .unwrap();
        }

        let related = fx
            .query
            .get_related_facts(hub, None, Some(100), &OwnerScope::Any)
            .unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].fact.subject, "near");
        assert_eq!(related[0].weight, 0.9);

        let filtered = fx
            .query
            .get_related_facts(hub, Some("other-relation"), Some(100), &OwnerScope::Any)
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn edge_query_filters_and_paginates() {
        let fx = fixture();
        let a = fx
            .store
            .insert_fact(fact(None, "a", "is", "a", 0), &fx.cancel)
            .unwrap();
        for i in 0..3 {
            let target = fx
                .store
                .insert_fact(fact(None, &format!("t{i}"), "is", "t", 0), &fx.cancel)
                .unwrap();
            fx.store
                .insert_edge(
                    EdgeInput {
                        owner: None,
                        source_id: a,
                        target_id: target,
                        relation_type: "linked".into(),
                        valid_from: 0,
                        weight: 0.1 * (i as f64 + 1.0),
                        metadata: Metadata::new(),
                    },
                    &fx.cancel,
                )
                .unwrap();
        }

        let page = fx
            .query
            .query_edges(&EdgeQuery {
                source_id: Some(a),
                at: Some(100),
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        // Strongest first; offset skipped the 0.3 edge.
        assert!(page[0].weight > page[1].weight);
        assert!((page[0].weight - 0.2).abs() < 1e-9);
    }

    #[test]
    fn owner_scoped_reads_never_leak_other_tenants() {
        let fx = fixture();
        fx.store
            .insert_fact(fact(Some("uA"), "S", "P", "a-row", 0), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(Some("uB"), "S", "P", "b-row", 0), &fx.cancel)
            .unwrap();
        fx.store
            .insert_fact(fact(None, "S", "P", "global-row", 0), &fx.cancel)
            .unwrap();

        let for_a = fx
            .query
            .query_facts_at_time(&FactQuery {
                at: Some(100),
                owner: OwnerScope::Owner("uA".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].object, "a-row");

        let global = fx
            .query
            .query_facts_at_time(&FactQuery {
                at: Some(100),
                owner: OwnerScope::Global,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].object, "global-row");
    }

    #[test]
    fn cache_serves_hydrated_rows_until_a_mutation_bumps_the_key() {
        let fx = fixture();
        let id = fx
            .store
            .insert_fact(fact(None, "s", "p", "o", 0), &fx.cancel)
            .unwrap();
        let q = FactQuery {
            subject: Some("s".into()),
            predicate: Some("p".into()),
            owner: OwnerScope::Global,
            at: Some(100),
            ..Default::default()
        };
        fx.query.query_facts_at_time(&q).unwrap();
        assert_eq!(fx.query.cache().len().0, 1);

        // Mutation bumps last_updated; the next read hydrates a fresh entry.
        fx.store
            .update_fact(
                id,
                &OwnerScope::Global,
                FactPatch {
                    confidence: Some(0.4),
                    metadata: None,
                },
                &fx.cancel,
            )
            .unwrap();
        let after = fx.query.query_facts_at_time(&q).unwrap();
        assert_eq!(after[0].confidence, 0.4);
        assert_eq!(fx.query.cache().len().0, 2);
    }

    #[test]
    fn encrypted_rows_hydrate_transparently() {
        let config = EngineConfig {
            encryption_enabled: true,
            encryption_primary_secret: Some("a-long-enough-secret".into()),
            ..Default::default()
        };
        let fx = fixture_with(CryptoProvider::from_config(&config).unwrap());
        let mut metadata = Metadata::new();
        metadata.insert("origin".into(), serde_json::json!("import"));
        let id = fx
            .store
            .insert_fact(
                FactInput {
                    metadata,
                    ..fact(None, "s", "p", "o", 0)
                },
                &fx.cancel,
            )
            .unwrap();

        // At rest: an envelope. Hydrated: the original map.
        let raw = fx.store.db().get_fact(&id).unwrap().unwrap();
        assert!(raw.metadata.starts_with("v1:"));
        let hydrated = fx
            .query
            .query_facts_at_time(&FactQuery {
                at: Some(100),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            hydrated[0].metadata.get("origin"),
            Some(&serde_json::json!("import"))
        );
    }
}
