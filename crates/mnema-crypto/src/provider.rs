//! The crypto provider: enabled AES mode or no-op mode, selected once per
//! process from configuration.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use mnema_core::{decode_metadata, encode_metadata, EngineConfig, Metadata, MnemaError};

use crate::envelope::{self, clear_key_cache, derive_key, is_envelope, DerivedKey};

/// Sentinel used to prove the configured keys actually roundtrip.
const KEY_SENTINEL: &[u8] = b"mnema::key-verification";

/// Encrypts and decrypts metadata blobs.
///
/// `Noop` is selected when encryption is disabled and returns its input
/// unchanged for both operations. `Aes` holds the derived key ring: primary
/// first, then each secondary in configured order.
pub enum CryptoProvider {
    Aes { keys: Vec<DerivedKey> },
    Noop,
}

impl CryptoProvider {
    /// Build a provider from configuration. Assumes `config.validate()` has
    /// already passed; an enabled config without a primary secret is treated
    /// as invalid here too.
    pub fn from_config(config: &EngineConfig) -> Result<Self, MnemaError> {
        if !config.encryption_enabled {
            return Ok(CryptoProvider::Noop);
        }
        let primary = config
            .encryption_primary_secret
            .as_deref()
            .ok_or_else(|| {
                MnemaError::InvalidConfig("encryption enabled but no primary secret set".into())
            })?;
        let mut keys = Vec::with_capacity(1 + config.encryption_secondary_secrets.len());
        keys.push(derive_key(primary, &config.encryption_salt));
        for secret in &config.encryption_secondary_secrets {
            keys.push(derive_key(secret, &config.encryption_salt));
        }
        Ok(CryptoProvider::Aes { keys })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, CryptoProvider::Aes { .. })
    }

    /// Seal `plaintext` into an envelope. No-op mode returns the plaintext
    /// unchanged (lossy for non-UTF-8 input, which never occurs for the JSON
    /// blobs this guards).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, MnemaError> {
        match self {
            CryptoProvider::Noop => Ok(String::from_utf8_lossy(plaintext).into_owned()),
            CryptoProvider::Aes { keys } => envelope::seal(&keys[0], plaintext),
        }
    }

    /// Open `blob`. Envelopes are decrypted against the key ring in order;
    /// anything without an envelope prefix passes through unchanged so rows
    /// written before encryption was enabled stay readable.
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>, MnemaError> {
        match self {
            CryptoProvider::Noop => Ok(blob.as_bytes().to_vec()),
            CryptoProvider::Aes { keys } => {
                if !is_envelope(blob) {
                    return Ok(blob.as_bytes().to_vec());
                }
                envelope::open(keys, blob)
            }
        }
    }

    /// Prove the configured keys roundtrip a known sentinel. Run at startup;
    /// a failure means the process must refuse to mutate metadata.
    pub fn verify_keys(&self) -> Result<(), MnemaError> {
        let sealed = self.encrypt(KEY_SENTINEL)?;
        let opened = self
            .decrypt(&sealed)
            .map_err(|_| MnemaError::KeyVerificationFailed)?;
        if opened != KEY_SENTINEL {
            return Err(MnemaError::KeyVerificationFailed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoProvider::Aes { keys } => write!(f, "CryptoProvider::Aes({} keys)", keys.len()),
            CryptoProvider::Noop => write!(f, "CryptoProvider::Noop"),
        }
    }
}

// ── Metadata helpers ─────────────────────────────────────────────────────────

/// Encode a metadata map to its persisted column value: JSON, wrapped in an
/// envelope when encryption is on.
pub fn seal_metadata(provider: &CryptoProvider, metadata: &Metadata) -> Result<String, MnemaError> {
    let json = encode_metadata(metadata)?;
    provider.encrypt(json.as_bytes())
}

/// Decode a persisted column value back into a metadata map.
pub fn open_metadata(provider: &CryptoProvider, blob: &str) -> Result<Metadata, MnemaError> {
    let bytes = provider.decrypt(blob)?;
    let json = String::from_utf8(bytes).map_err(|e| MnemaError::Serialization(e.to_string()))?;
    decode_metadata(&json)
}

// ── Process-wide provider ────────────────────────────────────────────────────

static GLOBAL_PROVIDER: Lazy<RwLock<Option<Arc<CryptoProvider>>>> =
    Lazy::new(|| RwLock::new(None));

/// Initialize the process-wide provider from configuration and verify its
/// keys. Selection is one-time: a second call returns the provider chosen
/// first, regardless of the configuration passed.
pub fn init_global_provider(config: &EngineConfig) -> Result<Arc<CryptoProvider>, MnemaError> {
    {
        let guard = GLOBAL_PROVIDER.read();
        if let Some(provider) = guard.as_ref() {
            return Ok(Arc::clone(provider));
        }
    }
    let mut guard = GLOBAL_PROVIDER.write();
    if let Some(provider) = guard.as_ref() {
        return Ok(Arc::clone(provider));
    }
    let provider = Arc::new(CryptoProvider::from_config(config)?);
    provider.verify_keys()?;
    info!(enabled = provider.is_enabled(), "crypto provider initialized");
    *guard = Some(Arc::clone(&provider));
    Ok(provider)
}

/// The provider selected for this process, if one was initialized.
pub fn global_provider() -> Option<Arc<CryptoProvider>> {
    GLOBAL_PROVIDER.read().clone()
}

/// Tear down the provider and the derived-key cache. Test hook.
pub fn reset_global_provider() {
    *GLOBAL_PROVIDER.write() = None;
    clear_key_cache();
}
