use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::MnemaError;

/// Milliseconds since the Unix epoch (UTC).
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

// ── FactId ───────────────────────────────────────────────────────────────────

/// 128-bit fact identifier, serialized as canonical hyphenated lowercase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId(pub Uuid);

impl FactId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(b))
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactId({})", &self.to_string()[..8])
    }
}

impl FromStr for FactId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ── EdgeId ───────────────────────────────────────────────────────────────────

/// 128-bit edge identifier, serialized as canonical hyphenated lowercase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(b))
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeId({})", &self.to_string()[..8])
    }
}

impl FromStr for EdgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ── OwnerScope ───────────────────────────────────────────────────────────────

/// Tenant scope of a read or write.
///
/// The three states are distinct and must never collapse into each other:
///   `Any`    — no owner filter; matches every row.
///   `Global` — matches only rows with no owner (the global tenant).
///   `Owner`  — matches only rows owned by exactly this tenant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OwnerScope {
    Any,
    Global,
    Owner(String),
}

impl OwnerScope {
    /// True if a row with the given owner column falls inside this scope.
    pub fn matches(&self, row_owner: &Option<String>) -> bool {
        match self {
            OwnerScope::Any => true,
            OwnerScope::Global => row_owner.is_none(),
            OwnerScope::Owner(id) => row_owner.as_deref() == Some(id.as_str()),
        }
    }

    /// The scope that matches exactly the rows a given owner column belongs to.
    pub fn of_row(row_owner: &Option<String>) -> Self {
        match row_owner {
            None => OwnerScope::Global,
            Some(id) => OwnerScope::Owner(id.clone()),
        }
    }

    /// Convenience constructor from an optional concrete tenant.
    pub fn from_option(owner: Option<String>) -> Self {
        match owner {
            None => OwnerScope::Global,
            Some(id) => OwnerScope::Owner(id),
        }
    }
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// Dynamic string-keyed metadata attached to a fact or edge. Persisted as a
/// single JSON blob (encrypted when the crypto provider is enabled).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Serialize a metadata map to its persisted JSON form.
pub fn encode_metadata(metadata: &Metadata) -> Result<String, MnemaError> {
    serde_json::to_string(metadata).map_err(|e| MnemaError::Serialization(e.to_string()))
}

/// Parse a plaintext metadata blob back into a map. An empty blob is an
/// empty map, so rows written before metadata existed stay readable.
pub fn decode_metadata(blob: &str) -> Result<Metadata, MnemaError> {
    if blob.is_empty() {
        return Ok(Metadata::new());
    }
    serde_json::from_str(blob).map_err(|e| MnemaError::Serialization(e.to_string()))
}
