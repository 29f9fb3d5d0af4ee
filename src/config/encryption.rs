//! Transparent decryption of `ENC:`-prefixed values.
//!
//! Ciphertext format: standard base64 of `nonce || sealed`, where the nonce
//! is 12 random bytes and `sealed` is AES-256-GCM output (tag appended). The
//! key is the SHA-256 digest of the passphrase.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

use super::error::{DecryptError, SourceError};
use super::value::{Map, Value};

/// Marks a value as ciphertext.
pub const DEFAULT_PREFIX: &str = "ENC:";

const NONCE_LEN: usize = 12;

/// A reversible string cipher.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, DecryptError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError>;
}

/// AES-256-GCM keyed from a passphrase.
#[derive(Clone)]
pub struct AesEncryptor {
    cipher: Aes256Gcm,
}

impl AesEncryptor {
    pub fn new(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl fmt::Debug for AesEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesEncryptor").finish_non_exhaustive()
    }
}

impl Encryptor for AesEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String, DecryptError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| DecryptError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| DecryptError::Encoding(e.to_string()))?;
        if bytes.len() < NONCE_LEN {
            return Err(DecryptError::TooShort);
        }

        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| DecryptError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| DecryptError::Utf8)
    }
}

/// Finds prefixed strings in a snapshot and decrypts them.
#[derive(Clone)]
pub struct EncryptionProcessor {
    encryptor: Arc<dyn Encryptor>,
    prefix: String,
}

impl EncryptionProcessor {
    pub fn new(encryptor: impl Encryptor + 'static) -> Self {
        Self::with_prefix(encryptor, DEFAULT_PREFIX)
    }

    pub fn with_prefix(encryptor: impl Encryptor + 'static, prefix: impl Into<String>) -> Self {
        Self {
            encryptor: Arc::new(encryptor),
            prefix: prefix.into(),
        }
    }

    /// Shorthand for an [`AesEncryptor`] with the default prefix.
    pub fn with_passphrase(passphrase: &str) -> Self {
        Self::new(AesEncryptor::new(passphrase))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Encrypts `plaintext` and prepends the prefix, ready to be stored.
    pub fn encrypt_value(&self, plaintext: &str) -> Result<String, DecryptError> {
        Ok(format!("{}{}", self.prefix, self.encryptor.encrypt(plaintext)?))
    }

    /// Decrypts a prefixed value; unprefixed input is returned unchanged.
    pub fn decrypt_value(&self, value: &str) -> Result<String, DecryptError> {
        match value.strip_prefix(self.prefix.as_str()) {
            Some(ciphertext) => self.encryptor.decrypt(ciphertext),
            None => Ok(value.to_string()),
        }
    }

    pub fn process(&self, data: &Map) -> Result<Map, SourceError> {
        let mut result = Map::new();
        for (key, value) in data {
            let plain = self
                .process_value(value)
                .map_err(|source| SourceError::Decrypt {
                    key: key.clone(),
                    source,
                })?;
            result.insert(key.clone(), plain);
        }
        Ok(result)
    }

    fn process_value(&self, value: &Value) -> Result<Value, DecryptError> {
        match value {
            Value::String(s) if s.starts_with(self.prefix.as_str()) => {
                self.decrypt_value(s).map(Value::String)
            }
            Value::Map(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.process_value(v)?);
                }
                Ok(Value::Map(out))
            }
            Value::List(items) => items
                .iter()
                .map(|item| self.process_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }
}

impl fmt::Debug for EncryptionProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionProcessor")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let processor = EncryptionProcessor::with_passphrase("hunter2");
        let stored = processor.encrypt_value("db-password").unwrap();
        assert!(stored.starts_with("ENC:"));
        assert_ne!(stored, "ENC:db-password");
        assert_eq!(processor.decrypt_value(&stored).unwrap(), "db-password");
    }

    #[test]
    fn test_nonce_is_random() {
        let enc = AesEncryptor::new("k");
        assert_ne!(enc.encrypt("same").unwrap(), enc.encrypt("same").unwrap());
    }

    #[test]
    fn test_unprefixed_values_pass_through() {
        let processor = EncryptionProcessor::with_passphrase("k");
        let data = Map::from([
            ("plain".to_string(), Value::from("visible")),
            ("port".to_string(), Value::Int(80)),
        ]);
        assert_eq!(processor.process(&data).unwrap(), data);
    }

    #[test]
    fn test_process_decrypts_nested_values() {
        let processor = EncryptionProcessor::with_passphrase("k");
        let secret = processor.encrypt_value("s3cret").unwrap();
        let data = Map::from([
            ("db.password".to_string(), Value::String(secret.clone())),
            ("list".to_string(), Value::List(vec![Value::String(secret)])),
        ]);

        let out = processor.process(&data).unwrap();
        assert_eq!(out["db.password"], Value::from("s3cret"));
        assert_eq!(out["list"], Value::List(vec![Value::from("s3cret")]));
    }

    #[test]
    fn test_wrong_passphrase_fails_authentication() {
        let stored = EncryptionProcessor::with_passphrase("right")
            .encrypt_value("x")
            .unwrap();
        let wrong = EncryptionProcessor::with_passphrase("wrong");
        assert_eq!(wrong.decrypt_value(&stored), Err(DecryptError::Authentication));

        let data = Map::from([("k".to_string(), Value::String(stored))]);
        assert!(matches!(
            wrong.process(&data),
            Err(SourceError::Decrypt { ref key, .. }) if key == "k"
        ));
    }

    #[test]
    fn test_malformed_ciphertext() {
        let processor = EncryptionProcessor::with_passphrase("k");
        assert!(matches!(
            processor.decrypt_value("ENC:***"),
            Err(DecryptError::Encoding(_))
        ));
        assert_eq!(
            processor.decrypt_value(&format!("ENC:{}", STANDARD.encode([1u8, 2, 3]))),
            Err(DecryptError::TooShort)
        );
    }

    #[test]
    fn test_custom_prefix() {
        let processor = EncryptionProcessor::with_prefix(AesEncryptor::new("k"), "secret:");
        let stored = processor.encrypt_value("v").unwrap();
        assert!(stored.starts_with("secret:"));
        assert_eq!(processor.decrypt_value(&stored).unwrap(), "v");
        assert_eq!(processor.decrypt_value("ENC:abc").unwrap(), "ENC:abc");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip(passphrase in ".{0,32}", plaintext in ".{0,128}") {
            let processor = EncryptionProcessor::with_passphrase(&passphrase);
            let stored = processor.encrypt_value(&plaintext).unwrap();
            prop_assert_eq!(processor.decrypt_value(&stored).unwrap(), plaintext);
        }
    }
}
