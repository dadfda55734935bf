use thiserror::Error;

use crate::types::Timestamp;

#[derive(Debug, Error)]
pub enum MnemaError {
    // ── Validation (rejected before any transaction opens) ───────────────────
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("confidence must be within [0, 1]; got {got}")]
    ConfidenceOutOfRange { got: f64 },

    #[error("weight must be within [0, 1]; got {got}")]
    WeightOutOfRange { got: f64 },

    #[error("window must be a positive number of days; got {got}")]
    NonPositiveWindow { got: i64 },

    #[error("decay rate must be within (0, 1]; got {got}")]
    DecayRateOutOfRange { got: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Integrity ────────────────────────────────────────────────────────────
    #[error("valid_to {valid_to} precedes valid_from {valid_from}")]
    IntervalInverted {
        valid_from: Timestamp,
        valid_to: Timestamp,
    },

    // ── Crypto ───────────────────────────────────────────────────────────────
    #[error("malformed encryption envelope")]
    MalformedEnvelope,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed with every configured key")]
    DecryptFailed,

    #[error("encryption key verification failed")]
    KeyVerificationFailed,

    #[error("encryption secret must be at least {min} characters")]
    SecretTooShort { min: usize },

    // ── Storage / serialization ──────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("metadata backend not supported: {0}")]
    UnsupportedBackend(String),

    // ── Control flow ─────────────────────────────────────────────────────────
    #[error("operation cancelled")]
    Cancelled,
}
