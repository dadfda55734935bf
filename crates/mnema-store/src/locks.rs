//! Per-key write serialization.
//!
//! sled has no row locks, so writers to the same (owner, subject, predicate)
//! keyspace are serialized with an in-process lock table instead. Handles
//! are handed out sorted and deduplicated so that multi-key writers always
//! acquire in the same order (deadlock freedom).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct KeyLocks {
    table: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handles for `keys`, sorted and deduplicated. Callers lock every
    /// handle, in order, and hold the guards for the whole staging+commit
    /// window.
    pub fn handles(&self, mut lock_keys: Vec<Vec<u8>>) -> Vec<Arc<Mutex<()>>> {
        lock_keys.sort();
        lock_keys.dedup();
        let mut table = self.table.lock();
        lock_keys
            .into_iter()
            .map(|k| Arc::clone(table.entry(k).or_default()))
            .collect()
    }
}
