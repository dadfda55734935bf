use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Transactional;
use std::path::Path;

use mnema_core::{EdgeId, EdgeRecord, FactId, FactRecord, MnemaError};

use crate::keys;

/// Persistent graph database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   facts      — FactId bytes → bincode(FactRecord)
///   facts_spo  — (owner, subject, predicate, valid_from, id) → FactId bytes
///   edges      — EdgeId bytes → bincode(EdgeRecord)
///   edges_key  — (owner, source, target, relation, valid_from, id) → EdgeId bytes
///   edges_src  — (source_id, edge_id) → [] (membership set)
///   edges_tgt  — (target_id, edge_id) → [] (membership set)
pub struct GraphDb {
    _db: sled::Db,
    facts: sled::Tree,
    facts_spo: sled::Tree,
    edges: sled::Tree,
    edges_key: sled::Tree,
    edges_src: sled::Tree,
    edges_tgt: sled::Tree,
}

/// One staged row mutation. A write-set of these commits atomically across
/// all trees; partial write-sets are never visible to readers.
#[derive(Clone, Debug)]
pub enum StagedWrite {
    PutFact(FactRecord),
    DeleteFact(FactRecord),
    PutEdge(EdgeRecord),
    DeleteEdge(EdgeRecord),
}

/// Row counts, for maintenance and monitoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub facts: u64,
    pub active_facts: u64,
    pub edges: u64,
    pub active_edges: u64,
}

// Tree positions inside a transaction batch.
const T_FACTS: usize = 0;
const T_FACTS_SPO: usize = 1;
const T_EDGES: usize = 2;
const T_EDGES_KEY: usize = 3;
const T_EDGES_SRC: usize = 4;
const T_EDGES_TGT: usize = 5;

/// A fully-encoded tree operation, ready to replay inside a transaction.
enum TreeOp {
    Insert(usize, Vec<u8>, Vec<u8>),
    Remove(usize, Vec<u8>),
}

fn storage_err(e: impl ToString) -> MnemaError {
    MnemaError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, MnemaError> {
    bincode::serialize(value).map_err(|e| MnemaError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MnemaError> {
    bincode::deserialize(bytes).map_err(|e| MnemaError::Serialization(e.to_string()))
}

impl GraphDb {
    /// Open or create the graph database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MnemaError> {
        let db = sled::open(path).map_err(storage_err)?;
        let facts = db.open_tree("facts").map_err(storage_err)?;
        let facts_spo = db.open_tree("facts_spo").map_err(storage_err)?;
        let edges = db.open_tree("edges").map_err(storage_err)?;
        let edges_key = db.open_tree("edges_key").map_err(storage_err)?;
        let edges_src = db.open_tree("edges_src").map_err(storage_err)?;
        let edges_tgt = db.open_tree("edges_tgt").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            facts,
            facts_spo,
            edges,
            edges_key,
            edges_src,
            edges_tgt,
        })
    }

    // ── Point reads ───────────────────────────────────────────────────────────

    pub fn get_fact(&self, id: &FactId) -> Result<Option<FactRecord>, MnemaError> {
        match self.facts.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_edge(&self, id: &EdgeId) -> Result<Option<EdgeRecord>, MnemaError> {
        match self.edges.get(id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Keyed scans ───────────────────────────────────────────────────────────

    /// Every version of one (owner, subject, predicate) key, ascending by
    /// `valid_from` (index-key order).
    pub fn facts_for_key(
        &self,
        owner: &Option<String>,
        subject: &str,
        predicate: &str,
    ) -> Result<Vec<FactRecord>, MnemaError> {
        let prefix = keys::fact_spo_prefix(owner, subject, predicate);
        let mut out = Vec::new();
        for item in self.facts_spo.scan_prefix(&prefix) {
            let (_, id_bytes) = item.map_err(storage_err)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(&id_bytes);
            if let Some(row) = self.get_fact(&FactId::from_bytes(arr))? {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Every version of one (owner, source, target, relation) edge identity,
    /// ascending by `valid_from`.
    pub fn edges_for_identity(
        &self,
        owner: &Option<String>,
        source_id: &FactId,
        target_id: &FactId,
        relation_type: &str,
    ) -> Result<Vec<EdgeRecord>, MnemaError> {
        let prefix = keys::edge_identity_prefix(owner, source_id, target_id, relation_type);
        let mut out = Vec::new();
        for item in self.edges_key.scan_prefix(&prefix) {
            let (_, id_bytes) = item.map_err(storage_err)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(&id_bytes);
            if let Some(row) = self.get_edge(&EdgeId::from_bytes(arr))? {
                out.push(row);
            }
        }
        Ok(out)
    }

    fn edges_by_endpoint(
        &self,
        tree: &sled::Tree,
        endpoint: &FactId,
    ) -> Result<Vec<EdgeRecord>, MnemaError> {
        let mut out = Vec::new();
        for item in tree.scan_prefix(endpoint.as_bytes()) {
            let (key, _) = item.map_err(storage_err)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(&key[16..32]);
            if let Some(row) = self.get_edge(&EdgeId::from_bytes(arr))? {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// All edges leaving `source_id` (any owner; callers filter by scope).
    pub fn edges_from(&self, source_id: &FactId) -> Result<Vec<EdgeRecord>, MnemaError> {
        self.edges_by_endpoint(&self.edges_src, source_id)
    }

    /// All edges arriving at `target_id`.
    pub fn edges_to(&self, target_id: &FactId) -> Result<Vec<EdgeRecord>, MnemaError> {
        self.edges_by_endpoint(&self.edges_tgt, target_id)
    }

    // ── Full scans ────────────────────────────────────────────────────────────

    /// Every fact row in the store (no filter).
    pub fn scan_facts(&self) -> Result<Vec<FactRecord>, MnemaError> {
        let mut out = Vec::new();
        for item in self.facts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    /// Every edge row in the store (no filter).
    pub fn scan_edges(&self) -> Result<Vec<EdgeRecord>, MnemaError> {
        let mut out = Vec::new();
        for item in self.edges.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Commit ────────────────────────────────────────────────────────────────

    /// Apply a staged write-set atomically across every tree. On failure
    /// nothing is applied.
    pub fn commit(&self, writes: &[StagedWrite]) -> Result<(), MnemaError> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut ops = Vec::with_capacity(writes.len() * 2);
        for write in writes {
            match write {
                StagedWrite::PutFact(row) => {
                    ops.push(TreeOp::Insert(
                        T_FACTS,
                        row.id.as_bytes().to_vec(),
                        encode(row)?,
                    ));
                    ops.push(TreeOp::Insert(
                        T_FACTS_SPO,
                        keys::fact_spo_key(
                            &row.owner,
                            &row.subject,
                            &row.predicate,
                            row.valid_from,
                            &row.id,
                        ),
                        row.id.as_bytes().to_vec(),
                    ));
                }
                StagedWrite::DeleteFact(row) => {
                    ops.push(TreeOp::Remove(T_FACTS, row.id.as_bytes().to_vec()));
                    ops.push(TreeOp::Remove(
                        T_FACTS_SPO,
                        keys::fact_spo_key(
                            &row.owner,
                            &row.subject,
                            &row.predicate,
                            row.valid_from,
                            &row.id,
                        ),
                    ));
                }
                StagedWrite::PutEdge(row) => {
                    ops.push(TreeOp::Insert(
                        T_EDGES,
                        row.id.as_bytes().to_vec(),
                        encode(row)?,
                    ));
                    ops.push(TreeOp::Insert(
                        T_EDGES_KEY,
                        keys::edge_identity_key(
                            &row.owner,
                            &row.source_id,
                            &row.target_id,
                            &row.relation_type,
                            row.valid_from,
                            &row.id,
                        ),
                        row.id.as_bytes().to_vec(),
                    ));
                    ops.push(TreeOp::Insert(
                        T_EDGES_SRC,
                        keys::edge_endpoint_key(&row.source_id, &row.id),
                        Vec::new(),
                    ));
                    ops.push(TreeOp::Insert(
                        T_EDGES_TGT,
                        keys::edge_endpoint_key(&row.target_id, &row.id),
                        Vec::new(),
                    ));
                }
                StagedWrite::DeleteEdge(row) => {
                    ops.push(TreeOp::Remove(T_EDGES, row.id.as_bytes().to_vec()));
                    ops.push(TreeOp::Remove(
                        T_EDGES_KEY,
                        keys::edge_identity_key(
                            &row.owner,
                            &row.source_id,
                            &row.target_id,
                            &row.relation_type,
                            row.valid_from,
                            &row.id,
                        ),
                    ));
                    ops.push(TreeOp::Remove(
                        T_EDGES_SRC,
                        keys::edge_endpoint_key(&row.source_id, &row.id),
                    ));
                    ops.push(TreeOp::Remove(
                        T_EDGES_TGT,
                        keys::edge_endpoint_key(&row.target_id, &row.id),
                    ));
                }
            }
        }

        let trees: [&sled::Tree; 6] = [
            &self.facts,
            &self.facts_spo,
            &self.edges,
            &self.edges_key,
            &self.edges_src,
            &self.edges_tgt,
        ];
        let result: Result<(), TransactionError<()>> =
            trees.as_ref().transaction(|txn: &Vec<TransactionalTree>| {
                for op in &ops {
                    match op {
                        TreeOp::Insert(tree, key, value) => {
                            txn[*tree].insert(key.as_slice(), value.as_slice())?;
                        }
                        TreeOp::Remove(tree, key) => {
                            txn[*tree].remove(key.as_slice())?;
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            });
        result.map_err(|e| MnemaError::Storage(format!("transaction failed: {e:?}")))
    }

    // ── Maintenance ───────────────────────────────────────────────────────────

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), MnemaError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// Row counts across both tables.
    pub fn stats(&self) -> Result<StoreStats, MnemaError> {
        let mut active_facts = 0u64;
        for row in self.scan_facts()? {
            if row.is_active() {
                active_facts += 1;
            }
        }
        let mut active_edges = 0u64;
        for row in self.scan_edges()? {
            if row.is_active() {
                active_edges += 1;
            }
        }
        Ok(StoreStats {
            facts: self.facts.len() as u64,
            active_facts,
            edges: self.edges.len() as u64,
            active_edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_core::now_ms;

    fn fact(owner: Option<&str>, subject: &str, valid_from: i64) -> FactRecord {
        FactRecord {
            id: FactId::generate(),
            owner: owner.map(String::from),
            subject: subject.into(),
            predicate: "p".into(),
            object: "o".into(),
            valid_from,
            valid_to: None,
            confidence: 0.9,
            last_updated: now_ms(),
            metadata: String::new(),
        }
    }

    fn open_temp() -> (tempfile::TempDir, GraphDb) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = GraphDb::open(dir.path()).expect("open sled");
        (dir, db)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (_dir, db) = open_temp();
        let row = fact(Some("u1"), "john", 1000);
        db.commit(&[StagedWrite::PutFact(row.clone())]).unwrap();
        let loaded = db.get_fact(&row.id).unwrap().expect("row present");
        assert_eq!(loaded.subject, "john");
        assert_eq!(loaded.owner.as_deref(), Some("u1"));
    }

    #[test]
    fn keyed_scan_returns_versions_in_valid_from_order() {
        let (_dir, db) = open_temp();
        let mut writes = Vec::new();
        for vf in [5000, 1000, 3000] {
            writes.push(StagedWrite::PutFact(fact(None, "john", vf)));
        }
        db.commit(&writes).unwrap();
        let rows = db.facts_for_key(&None, "john", "p").unwrap();
        let starts: Vec<i64> = rows.iter().map(|r| r.valid_from).collect();
        assert_eq!(starts, vec![1000, 3000, 5000]);
    }

    #[test]
    fn keyed_scan_respects_owner_column() {
        let (_dir, db) = open_temp();
        db.commit(&[
            StagedWrite::PutFact(fact(Some("uA"), "s", 1)),
            StagedWrite::PutFact(fact(Some("uB"), "s", 1)),
            StagedWrite::PutFact(fact(None, "s", 1)),
        ])
        .unwrap();
        assert_eq!(db.facts_for_key(&Some("uA".into()), "s", "p").unwrap().len(), 1);
        assert_eq!(db.facts_for_key(&None, "s", "p").unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_row_and_index_entry() {
        let (_dir, db) = open_temp();
        let row = fact(None, "john", 1000);
        db.commit(&[StagedWrite::PutFact(row.clone())]).unwrap();
        db.commit(&[StagedWrite::DeleteFact(row.clone())]).unwrap();
        assert!(db.get_fact(&row.id).unwrap().is_none());
        assert!(db.facts_for_key(&None, "john", "p").unwrap().is_empty());
    }

    #[test]
    fn edge_endpoint_indexes_track_both_sides() {
        let (_dir, db) = open_temp();
        let a = FactId::generate();
        let b = FactId::generate();
        let edge = EdgeRecord {
            id: EdgeId::generate(),
            owner: None,
            source_id: a,
            target_id: b,
            relation_type: "colocated".into(),
            valid_from: 0,
            valid_to: None,
            weight: 0.5,
            last_updated: now_ms(),
            metadata: String::new(),
        };
        db.commit(&[StagedWrite::PutEdge(edge.clone())]).unwrap();
        assert_eq!(db.edges_from(&a).unwrap().len(), 1);
        assert_eq!(db.edges_to(&b).unwrap().len(), 1);
        assert!(db.edges_from(&b).unwrap().is_empty());

        db.commit(&[StagedWrite::DeleteEdge(edge)]).unwrap();
        assert!(db.edges_from(&a).unwrap().is_empty());
        assert!(db.edges_to(&b).unwrap().is_empty());
    }
}
