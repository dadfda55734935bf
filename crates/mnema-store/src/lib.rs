//! mnema-store
//!
//! The bitemporal write path: sled-backed row store with composite-key
//! indexes, staged write-sets committed atomically across trees, and the
//! fact/edge engine (insert with collision resolution, merge, invalidate,
//! hard delete with edge cascade, batch insert, confidence decay).

pub mod db;
pub mod engine;
pub mod keys;
pub mod locks;

pub use db::{GraphDb, StagedWrite, StoreStats};
pub use engine::{EdgeInput, EdgePatch, FactInput, FactPatch, GraphStore};
