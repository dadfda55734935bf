//! The bitemporal write engine.
//!
//! Every operation validates at the API boundary, stages row mutations,
//! commits them atomically, and publishes events only after the commit.
//! Writers to the same (owner, subject, predicate) key or the same edge
//! identity hold that key's lock for the whole staging+commit window, so
//! at most one row per key is ever left active.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use mnema_core::{
    now_ms, CancelToken, Edge, EdgeId, EdgeRecord, Fact, FactId, FactRecord, Metadata, MnemaError,
    OwnerScope, Timestamp, CONFIDENCE_FLOOR, MS_PER_DAY,
};
use mnema_crypto::{seal_metadata, CryptoProvider};
use mnema_events::{EventBus, GraphEvent};

use crate::db::{GraphDb, StagedWrite};
use crate::keys;
use crate::locks::KeyLocks;

// ── Write inputs ──────────────────────────────────────────────────────────────

/// A fact to insert.
#[derive(Clone, Debug)]
pub struct FactInput {
    /// Owning tenant; `None` writes a global row.
    pub owner: Option<String>,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub valid_from: Timestamp,
    pub confidence: f64,
    pub metadata: Metadata,
}

impl FactInput {
    fn validate(&self) -> Result<(), MnemaError> {
        for (field, value) in [
            ("subject", &self.subject),
            ("predicate", &self.predicate),
            ("object", &self.object),
        ] {
            if value.is_empty() {
                return Err(MnemaError::EmptyField { field });
            }
        }
        if !(self.confidence >= 0.0 && self.confidence <= 1.0) {
            return Err(MnemaError::ConfidenceOutOfRange {
                got: self.confidence,
            });
        }
        Ok(())
    }
}

/// An edge to insert.
#[derive(Clone, Debug)]
pub struct EdgeInput {
    pub owner: Option<String>,
    pub source_id: FactId,
    pub target_id: FactId,
    pub relation_type: String,
    pub valid_from: Timestamp,
    pub weight: f64,
    pub metadata: Metadata,
}

impl EdgeInput {
    fn validate(&self) -> Result<(), MnemaError> {
        if self.relation_type.is_empty() {
            return Err(MnemaError::EmptyField {
                field: "relation_type",
            });
        }
        if !(self.weight >= 0.0 && self.weight <= 1.0) {
            return Err(MnemaError::WeightOutOfRange { got: self.weight });
        }
        Ok(())
    }
}

/// Partial update for `update_fact`. Unset fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct FactPatch {
    pub confidence: Option<f64>,
    pub metadata: Option<Metadata>,
}

/// Partial update for `update_edge`.
#[derive(Clone, Debug, Default)]
pub struct EdgePatch {
    pub weight: Option<f64>,
    pub metadata: Option<Metadata>,
}

// ── GraphStore ────────────────────────────────────────────────────────────────

/// The fact/edge write engine.
pub struct GraphStore {
    db: Arc<GraphDb>,
    crypto: Arc<CryptoProvider>,
    bus: Arc<EventBus>,
    locks: KeyLocks,
    decay_default_rate: f64,
}

impl GraphStore {
    pub fn new(
        db: Arc<GraphDb>,
        crypto: Arc<CryptoProvider>,
        bus: Arc<EventBus>,
        decay_default_rate: f64,
    ) -> Self {
        Self {
            db,
            crypto,
            bus,
            locks: KeyLocks::new(),
            decay_default_rate,
        }
    }

    pub fn db(&self) -> &Arc<GraphDb> {
        &self.db
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ── Fact writes ───────────────────────────────────────────────────────────

    /// Insert a fact, resolving collisions on its (owner, subject, predicate)
    /// key: an identical active row is merged (max confidence, metadata
    /// replaced); overlapping older rows are closed just before the new
    /// interval; a future row caps the new interval. Returns the id of the
    /// row that now carries the assertion.
    pub fn insert_fact(&self, input: FactInput, cancel: &CancelToken) -> Result<FactId, MnemaError> {
        let ids = self.batch_insert_facts(vec![input], cancel)?;
        Ok(ids[0])
    }

    /// Insert many facts in one transaction. Inputs are processed in list
    /// order, so several writes to the same key resolve deterministically;
    /// either every row commits or none does.
    pub fn batch_insert_facts(
        &self,
        inputs: Vec<FactInput>,
        cancel: &CancelToken,
    ) -> Result<Vec<FactId>, MnemaError> {
        for input in &inputs {
            input.validate()?;
        }
        cancel.checkpoint()?;

        let lock_keys = inputs
            .iter()
            .map(|i| keys::fact_spo_prefix(&i.owner, &i.subject, &i.predicate))
            .collect();
        let handles = self.locks.handles(lock_keys);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut staged = Vec::new();
        let mut events = Vec::new();
        let mut ids = Vec::with_capacity(inputs.len());
        // Working view per key, so later inputs in the batch observe rows
        // staged by earlier ones.
        let mut view: HashMap<Vec<u8>, Vec<FactRecord>> = HashMap::new();

        for input in inputs {
            let key = keys::fact_spo_prefix(&input.owner, &input.subject, &input.predicate);
            let rows = match view.entry(key) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(self.db.facts_for_key(
                    &input.owner,
                    &input.subject,
                    &input.predicate,
                )?),
            };
            let id = self.stage_fact_insert(rows, input, &mut staged, &mut events)?;
            ids.push(id);
        }

        cancel.checkpoint()?;
        self.db.commit(&staged)?;
        for event in &events {
            self.bus.publish(event);
        }
        Ok(ids)
    }

    fn stage_fact_insert(
        &self,
        rows: &mut Vec<FactRecord>,
        input: FactInput,
        staged: &mut Vec<StagedWrite>,
        events: &mut Vec<GraphEvent>,
    ) -> Result<FactId, MnemaError> {
        let now = now_ms();

        // Identical active assertion: merge instead of versioning.
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.is_active() && r.object == input.object)
        {
            row.confidence = row.confidence.max(input.confidence);
            row.metadata = seal_metadata(&self.crypto, &input.metadata)?;
            row.last_updated = now;
            staged.push(StagedWrite::PutFact(row.clone()));
            events.push(GraphEvent::FactUpdated {
                id: row.id,
                owner: row.owner.clone(),
                confidence: Some(row.confidence),
                metadata: Some(input.metadata),
                last_updated: now,
            });
            return Ok(row.id);
        }

        // Overlap resolution: close older intervals just before the new one;
        // a future row caps the new interval.
        let mut new_valid_to: Option<Timestamp> = None;
        for row in rows.iter_mut() {
            let could_overlap = row.valid_to.map_or(true, |to| to > input.valid_from);
            if !could_overlap {
                continue;
            }
            if row.valid_from <= input.valid_from {
                // A boundary collision (equal valid_from) must not invert the
                // older interval; it collapses to a single instant instead.
                row.valid_to = Some((input.valid_from - 1).max(row.valid_from));
                row.last_updated = now;
                staged.push(StagedWrite::PutFact(row.clone()));
            } else {
                let cap = row.valid_from - 1;
                new_valid_to = Some(new_valid_to.map_or(cap, |cur| cur.min(cap)));
            }
        }

        let record = FactRecord {
            id: FactId::generate(),
            owner: input.owner.clone(),
            subject: input.subject.clone(),
            predicate: input.predicate.clone(),
            object: input.object.clone(),
            valid_from: input.valid_from,
            valid_to: new_valid_to,
            confidence: input.confidence,
            last_updated: now,
            metadata: seal_metadata(&self.crypto, &input.metadata)?,
        };
        let id = record.id;
        staged.push(StagedWrite::PutFact(record.clone()));
        events.push(GraphEvent::FactCreated {
            fact: Fact::from_record(record.clone(), input.metadata),
        });
        rows.push(record);
        rows.sort_by_key(|r| r.valid_from);
        Ok(id)
    }

    /// Apply a partial update to a fact scoped by `scope`. A missing or
    /// out-of-scope id is a logged no-op, not an error.
    pub fn update_fact(
        &self,
        id: FactId,
        scope: &OwnerScope,
        patch: FactPatch,
        cancel: &CancelToken,
    ) -> Result<bool, MnemaError> {
        if let Some(confidence) = patch.confidence {
            if !(confidence >= 0.0 && confidence <= 1.0) {
                return Err(MnemaError::ConfidenceOutOfRange { got: confidence });
            }
        }
        cancel.checkpoint()?;

        let Some(probe) = self.scoped_fact(&id, scope)? else {
            return Ok(false);
        };
        let handles = self.locks.handles(vec![keys::fact_spo_prefix(
            &probe.owner,
            &probe.subject,
            &probe.predicate,
        )]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        // Re-read under the lock; a concurrent writer may have touched it.
        let Some(mut row) = self.scoped_fact(&id, scope)? else {
            return Ok(false);
        };

        let now = now_ms();
        if let Some(confidence) = patch.confidence {
            row.confidence = confidence;
        }
        if let Some(metadata) = &patch.metadata {
            row.metadata = seal_metadata(&self.crypto, metadata)?;
        }
        row.last_updated = now;

        cancel.checkpoint()?;
        self.db.commit(&[StagedWrite::PutFact(row.clone())])?;
        self.bus.publish(&GraphEvent::FactUpdated {
            id,
            owner: row.owner,
            confidence: patch.confidence,
            metadata: patch.metadata,
            last_updated: now,
        });
        Ok(true)
    }

    /// Close a fact's validity interval at `valid_to` (default: now). The
    /// supplied time must not precede the row's `valid_from`.
    pub fn invalidate_fact(
        &self,
        id: FactId,
        scope: &OwnerScope,
        valid_to: Option<Timestamp>,
        cancel: &CancelToken,
    ) -> Result<bool, MnemaError> {
        cancel.checkpoint()?;
        let Some(probe) = self.scoped_fact(&id, scope)? else {
            return Ok(false);
        };
        let handles = self.locks.handles(vec![keys::fact_spo_prefix(
            &probe.owner,
            &probe.subject,
            &probe.predicate,
        )]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let Some(mut row) = self.scoped_fact(&id, scope)? else {
            return Ok(false);
        };

        let valid_to = valid_to.unwrap_or_else(now_ms);
        if valid_to < row.valid_from {
            return Err(MnemaError::IntervalInverted {
                valid_from: row.valid_from,
                valid_to,
            });
        }
        row.valid_to = Some(valid_to);
        row.last_updated = now_ms();

        cancel.checkpoint()?;
        self.db.commit(&[StagedWrite::PutFact(row.clone())])?;
        self.bus.publish(&GraphEvent::FactDeleted {
            id,
            owner: row.owner,
            valid_to: Some(valid_to),
        });
        Ok(true)
    }

    /// Hard-delete a fact and, in the same transaction, every edge of the
    /// same owner touching it.
    pub fn delete_fact(
        &self,
        id: FactId,
        scope: &OwnerScope,
        cancel: &CancelToken,
    ) -> Result<bool, MnemaError> {
        cancel.checkpoint()?;
        let Some(probe) = self.scoped_fact(&id, scope)? else {
            return Ok(false);
        };
        let handles = self.locks.handles(vec![keys::fact_spo_prefix(
            &probe.owner,
            &probe.subject,
            &probe.predicate,
        )]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let Some(row) = self.scoped_fact(&id, scope)? else {
            return Ok(false);
        };

        let mut staged = vec![StagedWrite::DeleteFact(row.clone())];
        let mut events = vec![GraphEvent::FactDeleted {
            id,
            owner: row.owner.clone(),
            valid_to: None,
        }];
        let mut seen = HashSet::new();
        let mut cascade = self.db.edges_from(&id)?;
        cascade.extend(self.db.edges_to(&id)?);
        for edge in cascade {
            if edge.owner == row.owner && seen.insert(edge.id) {
                events.push(GraphEvent::EdgeDeleted {
                    id: edge.id,
                    owner: edge.owner.clone(),
                    valid_to: None,
                });
                staged.push(StagedWrite::DeleteEdge(edge));
            }
        }

        cancel.checkpoint()?;
        self.db.commit(&staged)?;
        for event in &events {
            self.bus.publish(event);
        }
        debug!(%id, cascaded = staged.len() - 1, "fact hard-deleted");
        Ok(true)
    }

    // ── Edge writes ───────────────────────────────────────────────────────────

    /// Insert an edge, resolving collisions on its
    /// (owner, source, target, relation) identity exactly like facts: an
    /// identical active edge is merged (max weight, metadata replaced);
    /// older overlapping versions are closed just before the new interval.
    pub fn insert_edge(&self, input: EdgeInput, cancel: &CancelToken) -> Result<EdgeId, MnemaError> {
        input.validate()?;
        cancel.checkpoint()?;

        let handles = self.locks.handles(vec![keys::edge_identity_prefix(
            &input.owner,
            &input.source_id,
            &input.target_id,
            &input.relation_type,
        )]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let mut rows = self.db.edges_for_identity(
            &input.owner,
            &input.source_id,
            &input.target_id,
            &input.relation_type,
        )?;
        let mut staged = Vec::new();
        let mut events = Vec::new();
        let now = now_ms();

        // Identical active edge (same identity, same start): merge. A later
        // start is a new version and closes the old interval below.
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.is_active() && r.valid_from == input.valid_from)
        {
            row.weight = row.weight.max(input.weight);
            row.metadata = seal_metadata(&self.crypto, &input.metadata)?;
            row.last_updated = now;
            let id = row.id;
            staged.push(StagedWrite::PutEdge(row.clone()));
            let event = GraphEvent::EdgeUpdated {
                id,
                owner: row.owner.clone(),
                weight: Some(row.weight),
                metadata: Some(input.metadata),
                last_updated: now,
            };
            cancel.checkpoint()?;
            self.db.commit(&staged)?;
            self.bus.publish(&event);
            return Ok(id);
        }

        let mut new_valid_to: Option<Timestamp> = None;
        for row in rows.iter_mut() {
            let could_overlap = row.valid_to.map_or(true, |to| to > input.valid_from);
            if !could_overlap {
                continue;
            }
            if row.valid_from <= input.valid_from {
                row.valid_to = Some((input.valid_from - 1).max(row.valid_from));
                row.last_updated = now;
                staged.push(StagedWrite::PutEdge(row.clone()));
            } else {
                let cap = row.valid_from - 1;
                new_valid_to = Some(new_valid_to.map_or(cap, |cur| cur.min(cap)));
            }
        }

        let record = EdgeRecord {
            id: EdgeId::generate(),
            owner: input.owner.clone(),
            source_id: input.source_id,
            target_id: input.target_id,
            relation_type: input.relation_type.clone(),
            valid_from: input.valid_from,
            valid_to: new_valid_to,
            weight: input.weight,
            last_updated: now,
            metadata: seal_metadata(&self.crypto, &input.metadata)?,
        };
        let id = record.id;
        staged.push(StagedWrite::PutEdge(record.clone()));
        events.push(GraphEvent::EdgeCreated {
            edge: Edge::from_record(record, input.metadata),
        });

        cancel.checkpoint()?;
        self.db.commit(&staged)?;
        for event in &events {
            self.bus.publish(event);
        }
        Ok(id)
    }

    /// Apply a partial update to an edge. Missing/out-of-scope ids no-op.
    pub fn update_edge(
        &self,
        id: EdgeId,
        scope: &OwnerScope,
        patch: EdgePatch,
        cancel: &CancelToken,
    ) -> Result<bool, MnemaError> {
        if let Some(weight) = patch.weight {
            if !(weight >= 0.0 && weight <= 1.0) {
                return Err(MnemaError::WeightOutOfRange { got: weight });
            }
        }
        cancel.checkpoint()?;

        let Some(probe) = self.scoped_edge(&id, scope)? else {
            return Ok(false);
        };
        let handles = self.locks.handles(vec![keys::edge_identity_prefix(
            &probe.owner,
            &probe.source_id,
            &probe.target_id,
            &probe.relation_type,
        )]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let Some(mut row) = self.scoped_edge(&id, scope)? else {
            return Ok(false);
        };

        let now = now_ms();
        if let Some(weight) = patch.weight {
            row.weight = weight;
        }
        if let Some(metadata) = &patch.metadata {
            row.metadata = seal_metadata(&self.crypto, metadata)?;
        }
        row.last_updated = now;

        cancel.checkpoint()?;
        self.db.commit(&[StagedWrite::PutEdge(row.clone())])?;
        self.bus.publish(&GraphEvent::EdgeUpdated {
            id,
            owner: row.owner,
            weight: patch.weight,
            metadata: patch.metadata,
            last_updated: now,
        });
        Ok(true)
    }

    /// Close an edge's validity interval at `valid_to` (default: now).
    pub fn invalidate_edge(
        &self,
        id: EdgeId,
        scope: &OwnerScope,
        valid_to: Option<Timestamp>,
        cancel: &CancelToken,
    ) -> Result<bool, MnemaError> {
        cancel.checkpoint()?;
        let Some(probe) = self.scoped_edge(&id, scope)? else {
            return Ok(false);
        };
        let handles = self.locks.handles(vec![keys::edge_identity_prefix(
            &probe.owner,
            &probe.source_id,
            &probe.target_id,
            &probe.relation_type,
        )]);
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let Some(mut row) = self.scoped_edge(&id, scope)? else {
            return Ok(false);
        };

        let valid_to = valid_to.unwrap_or_else(now_ms);
        if valid_to < row.valid_from {
            return Err(MnemaError::IntervalInverted {
                valid_from: row.valid_from,
                valid_to,
            });
        }
        row.valid_to = Some(valid_to);
        row.last_updated = now_ms();

        cancel.checkpoint()?;
        self.db.commit(&[StagedWrite::PutEdge(row.clone())])?;
        self.bus.publish(&GraphEvent::EdgeDeleted {
            id,
            owner: row.owner,
            valid_to: Some(valid_to),
        });
        Ok(true)
    }

    /// Hard-delete a single edge row.
    pub fn delete_edge(
        &self,
        id: EdgeId,
        scope: &OwnerScope,
        cancel: &CancelToken,
    ) -> Result<bool, MnemaError> {
        cancel.checkpoint()?;
        let Some(row) = self.scoped_edge(&id, scope)? else {
            return Ok(false);
        };
        cancel.checkpoint()?;
        self.db.commit(&[StagedWrite::DeleteEdge(row.clone())])?;
        self.bus.publish(&GraphEvent::EdgeDeleted {
            id,
            owner: row.owner,
            valid_to: None,
        });
        Ok(true)
    }

    // ── Maintenance ───────────────────────────────────────────────────────────

    /// Decay the confidence of every active fact in scope that is still
    /// above the floor:
    ///
    ///   confidence ← max(0.1, confidence × (1 − rate × idle_days))
    ///
    /// where idle time is measured from `last_updated` (recency of evidence,
    /// not age of the fact). Returns the number of rows touched; emits no
    /// per-row events.
    pub fn apply_confidence_decay(
        &self,
        rate: Option<f64>,
        scope: &OwnerScope,
        cancel: &CancelToken,
    ) -> Result<usize, MnemaError> {
        let rate = rate.unwrap_or(self.decay_default_rate);
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(MnemaError::DecayRateOutOfRange { got: rate });
        }
        cancel.checkpoint()?;

        let now = now_ms();
        let mut staged = Vec::new();
        for mut row in self.db.scan_facts()? {
            if !row.is_active() || row.confidence <= CONFIDENCE_FLOOR || !scope.matches(&row.owner)
            {
                continue;
            }
            let idle_days = (now - row.last_updated) as f64 / MS_PER_DAY as f64;
            let decayed = (row.confidence * (1.0 - rate * idle_days)).max(CONFIDENCE_FLOOR);
            if decayed >= row.confidence {
                continue;
            }
            row.confidence = decayed;
            row.last_updated = now;
            staged.push(StagedWrite::PutFact(row));
        }

        cancel.checkpoint()?;
        self.db.commit(&staged)?;
        info!(rows = staged.len(), rate, "applied confidence decay");
        Ok(staged.len())
    }

    /// Hard-delete every fact and edge owned by `owner` (tenant
    /// off-boarding). Emits a delete event per removed row.
    pub fn purge_owner(&self, owner: &str, cancel: &CancelToken) -> Result<usize, MnemaError> {
        if owner.is_empty() {
            return Err(MnemaError::EmptyField { field: "owner" });
        }
        cancel.checkpoint()?;

        let mut staged = Vec::new();
        let mut events = Vec::new();
        for row in self.db.scan_facts()? {
            if row.owner.as_deref() == Some(owner) {
                events.push(GraphEvent::FactDeleted {
                    id: row.id,
                    owner: row.owner.clone(),
                    valid_to: None,
                });
                staged.push(StagedWrite::DeleteFact(row));
            }
        }
        for row in self.db.scan_edges()? {
            if row.owner.as_deref() == Some(owner) {
                events.push(GraphEvent::EdgeDeleted {
                    id: row.id,
                    owner: row.owner.clone(),
                    valid_to: None,
                });
                staged.push(StagedWrite::DeleteEdge(row));
            }
        }

        cancel.checkpoint()?;
        self.db.commit(&staged)?;
        for event in &events {
            self.bus.publish(event);
        }
        info!(owner, rows = staged.len(), "purged owner");
        Ok(staged.len())
    }

    /// Remove closed rows whose interval ended before `cutoff` (retention).
    /// Active rows are never touched; no events are emitted.
    pub fn prune_closed_before(
        &self,
        cutoff: Timestamp,
        scope: &OwnerScope,
        cancel: &CancelToken,
    ) -> Result<usize, MnemaError> {
        cancel.checkpoint()?;
        let mut staged = Vec::new();
        for row in self.db.scan_facts()? {
            if scope.matches(&row.owner) && row.valid_to.map_or(false, |to| to < cutoff) {
                staged.push(StagedWrite::DeleteFact(row));
            }
        }
        for row in self.db.scan_edges()? {
            if scope.matches(&row.owner) && row.valid_to.map_or(false, |to| to < cutoff) {
                staged.push(StagedWrite::DeleteEdge(row));
            }
        }
        cancel.checkpoint()?;
        self.db.commit(&staged)?;
        info!(cutoff, rows = staged.len(), "pruned closed history");
        Ok(staged.len())
    }

    // ── Scoped reads ──────────────────────────────────────────────────────────

    fn scoped_fact(
        &self,
        id: &FactId,
        scope: &OwnerScope,
    ) -> Result<Option<FactRecord>, MnemaError> {
        match self.db.get_fact(id)? {
            Some(row) if scope.matches(&row.owner) => Ok(Some(row)),
            Some(_) => {
                debug!(%id, "fact exists but is outside the caller's owner scope");
                Ok(None)
            }
            None => {
                debug!(%id, "fact not found");
                Ok(None)
            }
        }
    }

    fn scoped_edge(
        &self,
        id: &EdgeId,
        scope: &OwnerScope,
    ) -> Result<Option<EdgeRecord>, MnemaError> {
        match self.db.get_edge(id)? {
            Some(row) if scope.matches(&row.owner) => Ok(Some(row)),
            Some(_) => {
                debug!(%id, "edge exists but is outside the caller's owner scope");
                Ok(None)
            }
            None => {
                debug!(%id, "edge not found");
                Ok(None)
            }
        }
    }
}
