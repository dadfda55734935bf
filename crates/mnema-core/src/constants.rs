//! ─── Mnema Engine Constants ─────────────────────────────────────────────────

// ── Time ─────────────────────────────────────────────────────────────────────

/// Milliseconds in one day; the unit of the confidence decay rate.
pub const MS_PER_DAY: i64 = 86_400_000;

// ── Confidence decay ─────────────────────────────────────────────────────────

/// Decayed confidence never drops below this floor, and rows already at or
/// below it are skipped entirely.
pub const CONFIDENCE_FLOOR: f64 = 0.1;

/// Default decay rate (fraction of confidence lost per idle day).
pub const DEFAULT_DECAY_RATE_PER_DAY: f64 = 0.01;

// ── Caching ──────────────────────────────────────────────────────────────────

/// Default capacity for the fact and edge hydration caches (entries each).
pub const DEFAULT_GRAPH_CACHE_SIZE: usize = 1024;

// ── Encryption ───────────────────────────────────────────────────────────────

/// Minimum length of the primary secret when encryption is enabled.
pub const MIN_SECRET_LEN: usize = 16;

/// Default key-derivation salt when the configuration leaves it unset.
pub const DEFAULT_ENCRYPTION_SALT: &str = "mnema-metadata-salt";
