//! mnema-crypto
//!
//! Authenticated encryption of metadata blobs at rest.
//!
//! AES-256-GCM over keys derived with PBKDF2-HMAC-SHA256; envelopes are
//! `v1:<iv_b64>:<ciphertext_b64>`. Decryption is rotation-aware (primary
//! secret first, then each secondary) and passes non-envelope blobs through
//! unchanged so rows written before encryption was enabled stay readable.

pub mod envelope;
pub mod provider;

pub use envelope::{derive_key, is_envelope, DerivedKey, ENVELOPE_PREFIX, PBKDF2_ITERATIONS};
pub use provider::{
    global_provider, init_global_provider, open_metadata, reset_global_provider, seal_metadata,
    CryptoProvider,
};
