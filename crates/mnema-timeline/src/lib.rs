//! mnema-timeline
//!
//! Chronological views over the bitemporal store: per-subject and
//! per-predicate timelines, change windows, two-point state diffs, change
//! frequency and volatility aggregates. Pure composition over the query
//! layer; nothing here touches storage or crypto directly.

pub mod engine;
pub mod entry;

pub use engine::{ChangeFrequency, FactChange, TimePointDiff, TimelineEngine, VolatileGroup};
pub use entry::{ChangeType, TimelineEntry};
