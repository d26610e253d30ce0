//! In-memory signing keys.
//!
//! A [`SigningKeyInfo`] is the working form of one key: the
//! algorithm-specific key object, the JWS algorithm it signs with and the
//! instant it stops being valid. Instances are immutable once built and
//! cheap to clone, so the key ring can hand out snapshots freely.

use std::{fmt, str::FromStr, sync::Arc};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{KeyResult, KeyStoreError};
use crate::jwks::Jwk;

/// JWS algorithms this service can sign with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[default]
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
}

impl SigningAlgorithm {
    /// JOSE name, as used in the `alg` header and the persisted record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
        }
    }

    pub fn family(&self) -> KeyFamily {
        KeyFamily::Rsa
    }
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::RS256 => Algorithm::RS256,
            SigningAlgorithm::RS384 => Algorithm::RS384,
            SigningAlgorithm::RS512 => Algorithm::RS512,
            SigningAlgorithm::PS256 => Algorithm::PS256,
            SigningAlgorithm::PS384 => Algorithm::PS384,
            SigningAlgorithm::PS512 => Algorithm::PS512,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            "PS256" => Ok(Self::PS256),
            "PS384" => Ok(Self::PS384),
            "PS512" => Ok(Self::PS512),
            other => Err(KeyStoreError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Asymmetric key families. Each [`SigningAlgorithm`] belongs to exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
}

/// Algorithm-specific private key, holding everything needed to both sign
/// and verify.
#[derive(Clone)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
}

impl SigningKey {
    pub fn family(&self) -> KeyFamily {
        match self {
            Self::Rsa(_) => KeyFamily::Rsa,
        }
    }

    /// Key used by `jsonwebtoken` to sign a token.
    pub fn encoding_key(&self) -> KeyResult<EncodingKey> {
        match self {
            Self::Rsa(private_key) => {
                let der = private_key
                    .to_pkcs1_der()
                    .map_err(|e| KeyStoreError::Generation(e.to_string()))?;
                Ok(EncodingKey::from_rsa_der(der.as_bytes()))
            }
        }
    }

    /// Key used by `jsonwebtoken` to validate a token signed by this key.
    pub fn decoding_key(&self) -> KeyResult<DecodingKey> {
        match self {
            Self::Rsa(private_key) => {
                let (n, e) = rsa_components(private_key);
                DecodingKey::from_rsa_components(&n, &e)
                    .map_err(|e| KeyStoreError::Generation(e.to_string()))
            }
        }
    }

    /// PKCS#8 DER encoding of the private key, zeroed on drop.
    pub fn to_pkcs8_der(&self) -> KeyResult<Zeroizing<Vec<u8>>> {
        match self {
            Self::Rsa(private_key) => {
                let doc = private_key
                    .to_pkcs8_der()
                    .map_err(|e| KeyStoreError::Generation(e.to_string()))?;
                Ok(Zeroizing::new(doc.as_bytes().to_vec()))
            }
        }
    }

    pub fn from_pkcs8_der(family: KeyFamily, der: &[u8]) -> Result<Self, rsa::pkcs8::Error> {
        match family {
            KeyFamily::Rsa => RsaPrivateKey::from_pkcs8_der(der).map(Self::Rsa),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa(_) => f.write_str("SigningKey::Rsa(..)"),
        }
    }
}

/// Base64url modulus and exponent of an RSA key.
fn rsa_components(private_key: &RsaPrivateKey) -> (String, String) {
    let public_key = private_key.to_public_key();
    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    (n, e)
}

/// One active key, as held by the key ring.
#[derive(Clone, Debug)]
pub struct SigningKeyInfo {
    key_id: String,
    key: Arc<SigningKey>,
    signing_algorithm: SigningAlgorithm,
    expiry_date: DateTime<Utc>,
}

impl SigningKeyInfo {
    pub fn new(
        key_id: impl Into<String>,
        key: SigningKey,
        signing_algorithm: SigningAlgorithm,
        expiry_date: DateTime<Utc>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            key: Arc::new(key),
            signing_algorithm,
            expiry_date,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    pub fn signing_algorithm(&self) -> SigningAlgorithm {
        self.signing_algorithm
    }

    pub fn expiry_date(&self) -> DateTime<Utc> {
        self.expiry_date
    }

    /// Expired keys can neither sign nor validate.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date <= now
    }

    /// A `jsonwebtoken` header carrying this key's algorithm and `kid`.
    pub fn header(&self) -> jsonwebtoken::Header {
        let mut header = jsonwebtoken::Header::new(self.signing_algorithm.into());
        header.kid = Some(self.key_id.clone());
        header
    }

    /// Public JSON Web Key for the JWKS document.
    pub fn jwk(&self) -> Jwk {
        match self.key.as_ref() {
            SigningKey::Rsa(private_key) => {
                let (n, e) = rsa_components(private_key);
                Jwk {
                    kty: "RSA".to_string(),
                    kid: self.key_id.clone(),
                    n,
                    e,
                    alg: self.signing_algorithm.to_string(),
                    r#use: "sig".to_string(),
                }
            }
        }
    }
}
