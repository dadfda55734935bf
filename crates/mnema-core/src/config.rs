//! Engine configuration.
//!
//! `EngineConfig` is deserializable from JSON so deployments can ship a
//! config file; every field has a working default. `validate` enforces the
//! constraints the engine relies on before anything is opened.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DECAY_RATE_PER_DAY, DEFAULT_ENCRYPTION_SALT, DEFAULT_GRAPH_CACHE_SIZE, MIN_SECRET_LEN,
};
use crate::error::MnemaError;

/// Which backend persists fact and edge rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataBackend {
    /// Embedded sled database. Row locking is emulated with an in-process
    /// per-key lock table.
    LocalEmbedded,
    /// External relational database with native row locks. Accepted by the
    /// parser; not implemented by this engine yet.
    RemoteRelational,
}

impl Default for MetadataBackend {
    fn default() -> Self {
        MetadataBackend::LocalEmbedded
    }
}

/// Everything the engine core needs to come up.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Encrypt metadata blobs at rest.
    pub encryption_enabled: bool,
    /// Primary secret; required (≥ 16 chars) when encryption is enabled.
    pub encryption_primary_secret: Option<String>,
    /// Older secrets still accepted for decryption, most recent first.
    pub encryption_secondary_secrets: Vec<String>,
    /// PBKDF2 salt.
    pub encryption_salt: String,
    pub metadata_backend: MetadataBackend,
    /// Entry bound for each hydration cache (facts and edges).
    pub graph_cache_size: usize,
    /// Decay rate used when `apply_confidence_decay` gets no explicit rate.
    pub decay_default_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: false,
            encryption_primary_secret: None,
            encryption_secondary_secrets: Vec::new(),
            encryption_salt: DEFAULT_ENCRYPTION_SALT.to_string(),
            metadata_backend: MetadataBackend::default(),
            graph_cache_size: DEFAULT_GRAPH_CACHE_SIZE,
            decay_default_rate: DEFAULT_DECAY_RATE_PER_DAY,
        }
    }
}

impl EngineConfig {
    /// Check every constraint the engine relies on. Called by the engine
    /// facade before any component is constructed.
    pub fn validate(&self) -> Result<(), MnemaError> {
        if self.encryption_enabled {
            match &self.encryption_primary_secret {
                None => {
                    return Err(MnemaError::InvalidConfig(
                        "encryption enabled but no primary secret set".into(),
                    ))
                }
                Some(secret) if secret.len() < MIN_SECRET_LEN => {
                    return Err(MnemaError::SecretTooShort {
                        min: MIN_SECRET_LEN,
                    })
                }
                Some(_) => {}
            }
            if self.encryption_salt.is_empty() {
                return Err(MnemaError::InvalidConfig(
                    "encryption salt must not be empty".into(),
                ));
            }
        }
        if self.graph_cache_size == 0 {
            return Err(MnemaError::InvalidConfig(
                "graph_cache_size must be at least 1".into(),
            ));
        }
        if !(self.decay_default_rate > 0.0 && self.decay_default_rate <= 1.0) {
            return Err(MnemaError::DecayRateOutOfRange {
                got: self.decay_default_rate,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().expect("default config");
    }

    #[test]
    fn enabled_encryption_requires_a_secret() {
        let cfg = EngineConfig {
            encryption_enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(MnemaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn short_secret_is_rejected() {
        let cfg = EngineConfig {
            encryption_enabled: true,
            encryption_primary_secret: Some("too-short".into()),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(MnemaError::SecretTooShort { min: 16 })
        ));
    }

    #[test]
    fn zero_cache_size_is_rejected() {
        let cfg = EngineConfig {
            graph_cache_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backend_parses_kebab_case() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"metadata_backend":"remote-relational"}"#).unwrap();
        assert_eq!(cfg.metadata_backend, MetadataBackend::RemoteRelational);
    }
}
