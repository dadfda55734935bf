//! mnema-engine — the assembled bitemporal knowledge-graph engine.
//!
//! Startup sequence:
//!   1. Validate the configuration
//!   2. Build the crypto provider and verify its keys
//!   3. Open the graph database
//!   4. Wire the event bus, write engine, query engine and timeline layer
//!
//! The wire surface (MCP adapter, HTTP/JSON-RPC) lives outside this
//! workspace; adapters translate requests into the APIs exposed here.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use mnema_crypto::CryptoProvider;
use mnema_store::GraphDb;

pub use mnema_core::{
    CancelToken, Edge, EdgeId, EngineConfig, Fact, FactId, Metadata, MetadataBackend, MnemaError,
    OwnerScope, Timestamp,
};
pub use mnema_events::{EventBus, GraphEvent, SubscriberId, Topic};
pub use mnema_query::{EdgeQuery, FactQuery, QueryEngine, RelatedFact, SearchScope};
pub use mnema_store::{EdgeInput, EdgePatch, FactInput, FactPatch, GraphStore, StoreStats};
pub use mnema_timeline::{
    ChangeFrequency, ChangeType, FactChange, TimePointDiff, TimelineEngine, TimelineEntry,
    VolatileGroup,
};

/// The assembled engine: one store, one query layer, one timeline layer,
/// one event bus, all sharing a database and a crypto provider.
pub struct MemoryEngine {
    config: EngineConfig,
    db: Arc<GraphDb>,
    bus: Arc<EventBus>,
    store: GraphStore,
    query: Arc<QueryEngine>,
    timeline: TimelineEngine,
}

impl MemoryEngine {
    /// Validate `config`, verify encryption keys, open the database at
    /// `path` and wire every component.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self, MnemaError> {
        config.validate()?;
        if config.metadata_backend == MetadataBackend::RemoteRelational {
            return Err(MnemaError::UnsupportedBackend(
                "remote-relational (only local-embedded is compiled in)".into(),
            ));
        }

        let crypto = Arc::new(CryptoProvider::from_config(&config)?);
        crypto.verify_keys()?;

        let db = Arc::new(GraphDb::open(path)?);
        let bus = Arc::new(EventBus::new());
        let store = GraphStore::new(
            Arc::clone(&db),
            Arc::clone(&crypto),
            Arc::clone(&bus),
            config.decay_default_rate,
        );
        let query = Arc::new(QueryEngine::new(
            Arc::clone(&db),
            Arc::clone(&crypto),
            config.graph_cache_size,
        ));
        let timeline = TimelineEngine::new(Arc::clone(&query));

        info!(
            encryption = crypto.is_enabled(),
            cache_size = config.graph_cache_size,
            "memory engine opened"
        );
        Ok(Self {
            config,
            db,
            bus,
            store,
            query,
            timeline,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The write API: inserts, updates, invalidations, deletes, decay.
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// The read API: point-in-time, range, search and traversal queries.
    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    /// The analytics API: timelines, diffs, change aggregates.
    pub fn timeline(&self) -> &TimelineEngine {
        &self.timeline
    }

    /// The event bus; subscribe here for mutation events.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Force pending writes to disk.
    pub fn flush(&self) -> Result<(), MnemaError> {
        self.db.flush()
    }

    /// Row counts across both tables.
    pub fn stats(&self) -> Result<StoreStats, MnemaError> {
        self.db.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_the_unimplemented_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            metadata_backend: MetadataBackend::RemoteRelational,
            ..Default::default()
        };
        assert!(matches!(
            MemoryEngine::open(dir.path(), config),
            Err(MnemaError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn open_rejects_invalid_configs_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            encryption_enabled: true,
            encryption_primary_secret: Some("short".into()),
            ..Default::default()
        };
        assert!(MemoryEngine::open(dir.path(), config).is_err());
    }
}
