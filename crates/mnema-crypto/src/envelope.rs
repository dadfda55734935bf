//! Envelope format and key derivation.
//!
//! An envelope is the exact textual form `v1:<iv_b64>:<ciphertext_b64>`:
//! AES-256-GCM, a 12-byte random IV, base64 standard alphabet. The legacy
//! `enc:` prefix is accepted on decrypt with the same layout.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

use mnema_core::MnemaError;

/// Current envelope version prefix.
pub const ENVELOPE_PREFIX: &str = "v1:";

/// Pre-versioning envelope prefix, still accepted on decrypt.
pub const LEGACY_PREFIX: &str = "enc:";

/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// A derived AES-256 key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey(pub(crate) [u8; KEY_LEN]);

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKey(..)")
    }
}

// Each (secret, salt) pair is derived at most once per process. The map is
// bounded by the number of configured secrets.
static KEY_CACHE: Lazy<Mutex<HashMap<(String, String), DerivedKey>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Derive (or fetch the memoized) AES-256 key for `secret` under `salt`.
pub fn derive_key(secret: &str, salt: &str) -> DerivedKey {
    let cache_key = (secret.to_string(), salt.to_string());
    let mut cache = KEY_CACHE.lock();
    if let Some(key) = cache.get(&cache_key) {
        return key.clone();
    }
    let mut material = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        secret.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut material,
    );
    let key = DerivedKey(material);
    cache.insert(cache_key, key.clone());
    key
}

/// Drop every memoized key. Test hook, invoked by the provider reset.
pub(crate) fn clear_key_cache() {
    KEY_CACHE.lock().clear();
}

/// True if `blob` carries an envelope prefix (current or legacy).
pub fn is_envelope(blob: &str) -> bool {
    blob.starts_with(ENVELOPE_PREFIX) || blob.starts_with(LEGACY_PREFIX)
}

/// Encrypt `plaintext` under `key` into a fresh `v1:` envelope.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<String, MnemaError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| MnemaError::EncryptFailed)?;
    Ok(format!(
        "{}{}:{}",
        ENVELOPE_PREFIX,
        BASE64.encode(iv),
        BASE64.encode(ciphertext)
    ))
}

/// Parse an envelope into its IV and ciphertext.
fn parse(envelope: &str) -> Result<(Vec<u8>, Vec<u8>), MnemaError> {
    let body = envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .or_else(|| envelope.strip_prefix(LEGACY_PREFIX))
        .ok_or(MnemaError::MalformedEnvelope)?;
    let (iv_b64, ct_b64) = body.split_once(':').ok_or(MnemaError::MalformedEnvelope)?;
    if ct_b64.contains(':') {
        return Err(MnemaError::MalformedEnvelope);
    }
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|_| MnemaError::MalformedEnvelope)?;
    if iv.len() != IV_LEN {
        return Err(MnemaError::MalformedEnvelope);
    }
    let ciphertext = BASE64
        .decode(ct_b64)
        .map_err(|_| MnemaError::MalformedEnvelope)?;
    Ok((iv, ciphertext))
}

/// Decrypt an envelope, trying each key in order. The first key that
/// authenticates wins; if none does, the blob was sealed under an unknown
/// secret or tampered with.
pub fn open(keys: &[DerivedKey], envelope: &str) -> Result<Vec<u8>, MnemaError> {
    let (iv, ciphertext) = parse(envelope)?;
    let nonce = Nonce::from_slice(&iv);
    for key in keys {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
        if let Ok(plaintext) = cipher.decrypt(nonce, ciphertext.as_slice()) {
            return Ok(plaintext);
        }
    }
    Err(MnemaError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(secret: &str) -> DerivedKey {
        derive_key(secret, "test-salt")
    }

    #[test]
    fn seal_open_roundtrip() {
        let k = key("a-primary-secret-0123");
        let env = seal(&k, b"hello world").unwrap();
        assert_eq!(open(&[k], &env).unwrap(), b"hello world");
    }

    #[test]
    fn roundtrip_of_empty_plaintext() {
        let k = key("a-primary-secret-0123");
        let env = seal(&k, b"").unwrap();
        assert_eq!(open(&[k], &env).unwrap(), b"");
    }

    #[test]
    fn envelope_has_exact_textual_form() {
        let k = key("a-primary-secret-0123");
        let env = seal(&k, b"payload").unwrap();
        let parts: Vec<&str> = env.splitn(3, ':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "v1");
        for part in &parts[1..] {
            assert!(!part.is_empty());
            assert!(part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
        }
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let k = key("a-primary-secret-0123");
        let a = seal(&k, b"same plaintext").unwrap();
        let b = seal(&k, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn second_key_in_rotation_order_decrypts() {
        let old = key("the-old-secret-000001");
        let new = key("the-new-secret-000002");
        let env = seal(&old, b"rotated").unwrap();
        assert_eq!(open(&[new, old], &env).unwrap(), b"rotated");
    }

    #[test]
    fn wrong_key_fails_closed() {
        let k = key("a-primary-secret-0123");
        let other = key("a-different-secret-99");
        let env = seal(&k, b"secret bytes").unwrap();
        assert!(matches!(
            open(&[other], &env),
            Err(MnemaError::DecryptFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_tag_check() {
        let k = key("a-primary-secret-0123");
        let env = seal(&k, b"secret bytes").unwrap();
        // Flip a character deep in the ciphertext part.
        let mut chars: Vec<char> = env.chars().collect();
        let last = chars.len() - 2;
        chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert!(open(&[k], &tampered).is_err());
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        let k = key("a-primary-secret-0123");
        for bad in ["v1:", "v1:only-one-part", "v1:!!!:###", "v1:QQ==:QQ==:extra"] {
            assert!(
                matches!(open(&[k.clone()], bad), Err(MnemaError::MalformedEnvelope)),
                "expected malformed: {bad}"
            );
        }
    }

    #[test]
    fn legacy_prefix_decrypts_with_same_layout() {
        let k = key("a-primary-secret-0123");
        let env = seal(&k, b"old row").unwrap();
        let legacy = format!("enc:{}", env.strip_prefix("v1:").unwrap());
        assert_eq!(open(&[k], &legacy).unwrap(), b"old row");
    }

    #[test]
    fn derive_key_is_memoized() {
        let a = derive_key("memo-secret-012345678", "salt");
        let b = derive_key("memo-secret-012345678", "salt");
        assert_eq!(a.0, b.0);
        let c = derive_key("memo-secret-012345678", "other-salt");
        assert_ne!(a.0, c.0);
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_is_identity_on_arbitrary_bytes(data: Vec<u8>) {
            let k = key("property-secret-01234");
            let env = seal(&k, &data).unwrap();
            proptest::prop_assert_eq!(open(&[k], &env).unwrap(), data);
        }
    }
}
