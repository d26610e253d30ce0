//! Durable form of a signing key.
//!
//! Private key material is persisted so that a restarted process can keep
//! signing with the key it was using. It is never stored in the clear:
//! [`KeySealer`] encrypts the PKCS#8 encoding with AES-256-GCM, binding the
//! key id as associated data so a row cannot be replayed under another id.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::{KeyResult, KeyStoreError},
    key::{SigningAlgorithm, SigningKey, SigningKeyInfo},
};

const NONCE_LEN: usize = 12;
pub const KEY_ENCRYPTION_KEY_LEN: usize = 32;

/// One key as stored by a persistence adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Stable identity of the key across memory and storage.
    pub key_id: String,
    /// JOSE algorithm name, e.g. `RS256`.
    pub algorithm: String,
    /// `nonce || ciphertext` of the sealed private key.
    pub key_data: Vec<u8>,
    /// Set at creation and never changed.
    pub expiry_date: DateTime<Utc>,
}

impl KeyMaterial {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date <= now
    }
}

/// Encrypts keys on their way to storage and decrypts them on the way back.
#[derive(Clone)]
pub struct KeySealer {
    cipher: Aes256Gcm,
}

impl KeySealer {
    pub fn new(key_encryption_key: &[u8; KEY_ENCRYPTION_KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_encryption_key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Builds a sealer from a standard base64 encoding of 32 random bytes.
    pub fn from_base64(encoded: &str) -> KeyResult<Self> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
            KeyStoreError::InvalidKeyEncryptionKey(format!("not valid base64: {e}"))
        })?);
        let key: Zeroizing<[u8; KEY_ENCRYPTION_KEY_LEN]> =
            Zeroizing::new(bytes.as_slice().try_into().map_err(|_| {
                KeyStoreError::InvalidKeyEncryptionKey(format!(
                    "must be {KEY_ENCRYPTION_KEY_LEN} bytes, got {}",
                    bytes.len()
                ))
            })?);
        Ok(Self::new(&key))
    }

    pub fn seal(&self, info: &SigningKeyInfo) -> KeyResult<KeyMaterial> {
        let plaintext = info.key().to_pkcs8_der()?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: info.key_id().as_bytes(),
                },
            )
            .map_err(|e| KeyStoreError::material(info.key_id(), e))?;

        let mut key_data = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        key_data.extend_from_slice(&nonce);
        key_data.extend_from_slice(&ciphertext);

        Ok(KeyMaterial {
            key_id: info.key_id().to_string(),
            algorithm: info.signing_algorithm().to_string(),
            key_data,
            expiry_date: info.expiry_date(),
        })
    }

    pub fn open(&self, material: &KeyMaterial) -> KeyResult<SigningKeyInfo> {
        let algorithm: SigningAlgorithm = material
            .algorithm
            .parse()
            .map_err(|e| KeyStoreError::material(&material.key_id, e))?;

        if material.key_data.len() <= NONCE_LEN {
            return Err(KeyStoreError::material(
                &material.key_id,
                "key data too short",
            ));
        }
        let (nonce, ciphertext) = material.key_data.split_at(NONCE_LEN);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: material.key_id.as_bytes(),
                    },
                )
                .map_err(|_| KeyStoreError::material(&material.key_id, "decryption failed"))?,
        );

        let key = SigningKey::from_pkcs8_der(algorithm.family(), &plaintext)
            .map_err(|e| KeyStoreError::material(&material.key_id, e))?;

        Ok(SigningKeyInfo::new(
            material.key_id.clone(),
            key,
            algorithm,
            material.expiry_date,
        ))
    }
}

impl fmt::Debug for KeySealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeySealer(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use chrono::Duration;

    #[test]
    fn sealed_material_opens_to_the_same_key() {
        let sealer = testutil::sealer();
        let expiry = Utc::now() + Duration::hours(24);
        let info = testutil::key_info("sealed-1", expiry);

        let material = sealer.seal(&info).unwrap();
        assert_eq!(material.key_id, "sealed-1");
        assert_eq!(material.algorithm, "RS256");
        assert_eq!(material.expiry_date, expiry);

        let opened = sealer.open(&material).unwrap();
        assert_eq!(opened.key_id(), "sealed-1");
        assert_eq!(opened.expiry_date(), expiry);
        assert_eq!(opened.jwk().n, info.jwk().n);
    }

    #[test]
    fn sealed_material_hides_private_key() {
        let sealer = testutil::sealer();
        let info = testutil::key_info("sealed-2", Utc::now());
        let der = info.key().to_pkcs8_der().unwrap();

        let material = sealer.seal(&info).unwrap();
        assert!(
            !material
                .key_data
                .windows(32)
                .any(|w| w == &der[der.len() - 32..])
        );
    }

    #[test]
    fn wrong_key_encryption_key_fails() {
        let info = testutil::key_info("sealed-3", Utc::now());
        let material = testutil::sealer().seal(&info).unwrap();

        let other = KeySealer::new(&[9u8; KEY_ENCRYPTION_KEY_LEN]);
        let err = other.open(&material).unwrap_err();
        assert!(matches!(err, KeyStoreError::Material { .. }));
    }

    #[test]
    fn renamed_material_fails_to_open() {
        let sealer = testutil::sealer();
        let mut material = sealer
            .seal(&testutil::key_info("original", Utc::now()))
            .unwrap();
        material.key_id = "forged".to_string();

        assert!(sealer.open(&material).is_err());
    }

    #[test]
    fn key_encryption_key_must_be_32_bytes() {
        assert!(KeySealer::from_base64(&STANDARD.encode([1u8; 32])).is_ok());
        let err = KeySealer::from_base64(&STANDARD.encode([1u8; 16])).unwrap_err();
        assert!(matches!(err, KeyStoreError::InvalidKeyEncryptionKey(_)));
        assert!(err.to_string().contains("32 bytes"));
        assert!(KeySealer::from_base64("not base64!").is_err());
    }
}
