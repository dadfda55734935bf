//! mnema-query
//!
//! Read paths over the bitemporal store: point-in-time and range queries,
//! keyword search, 1-hop traversal, edge queries. Rows are hydrated
//! (metadata decrypted) through a bounded LRU keyed `(id, last_updated)`,
//! so any mutation naturally invalidates its cache entry.

pub mod cache;
pub mod engine;

pub use cache::HydrationCache;
pub use engine::{EdgeQuery, FactQuery, QueryEngine, RelatedFact, SearchScope};
