//! Key minting.
//!
//! Generation is pluggable so the lifecycle manager does not care which
//! asymmetric family backs a key. The default mints a fresh RSA key pair.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;

use crate::{
    error::{KeyResult, KeyStoreError},
    key::{KeyFamily, SigningAlgorithm, SigningKey, SigningKeyInfo},
};

/// Produces new signing keys.
///
/// Implementations are called from a blocking thread and may be CPU heavy.
/// Every returned key must carry a key id never returned before by the same
/// generator.
pub trait KeyGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        issued_at: DateTime<Utc>,
        expiry_date: DateTime<Utc>,
    ) -> KeyResult<SigningKeyInfo>;

    /// Algorithm every generated key signs with.
    fn algorithm(&self) -> SigningAlgorithm;
}

pub const DEFAULT_RSA_KEY_SIZE: usize = 2048;

/// Mints RSA key pairs identified by their issue time in nanoseconds.
#[derive(Debug)]
pub struct RsaKeyGenerator {
    bits: usize,
    algorithm: SigningAlgorithm,
    last_id: AtomicI64,
}

impl RsaKeyGenerator {
    pub fn new(bits: usize, algorithm: SigningAlgorithm) -> KeyResult<Self> {
        if algorithm.family() != KeyFamily::Rsa {
            return Err(KeyStoreError::Generation(format!(
                "{algorithm} is not an RSA algorithm"
            )));
        }
        Ok(Self {
            bits,
            algorithm,
            last_id: AtomicI64::new(0),
        })
    }

    /// Next key id: the issue instant in nanoseconds, bumped past the previous
    /// id when two keys are issued within the same tick of the clock.
    fn next_key_id(&self, issued_at: DateTime<Utc>) -> String {
        let ticks = issued_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| issued_at.timestamp_micros().saturating_mul(1_000));
        let mut previous = self.last_id.load(Ordering::Relaxed);
        loop {
            let candidate = ticks.max(previous + 1);
            match self.last_id.compare_exchange_weak(
                previous,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate.to_string(),
                Err(actual) => previous = actual,
            }
        }
    }
}

impl Default for RsaKeyGenerator {
    fn default() -> Self {
        Self {
            bits: DEFAULT_RSA_KEY_SIZE,
            algorithm: SigningAlgorithm::RS256,
            last_id: AtomicI64::new(0),
        }
    }
}

impl KeyGenerator for RsaKeyGenerator {
    #[tracing::instrument(skip(self), fields(bits = self.bits, alg = %self.algorithm))]
    fn generate(
        &self,
        issued_at: DateTime<Utc>,
        expiry_date: DateTime<Utc>,
    ) -> KeyResult<SigningKeyInfo> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, self.bits)
            .map_err(|e| KeyStoreError::Generation(e.to_string()))?;

        Ok(SigningKeyInfo::new(
            self.next_key_id(issued_at),
            SigningKey::Rsa(private_key),
            self.algorithm,
            expiry_date,
        ))
    }

    fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn key_ids_are_unique_for_identical_instants() {
        let generator = RsaKeyGenerator::default();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first = generator.next_key_id(at);
        let second = generator.next_key_id(at);
        let third = generator.next_key_id(at - Duration::seconds(5));

        assert_eq!(first, at.timestamp_nanos_opt().unwrap().to_string());
        assert_ne!(first, second);
        assert!(third.parse::<i64>().unwrap() > second.parse::<i64>().unwrap());
    }

    #[test]
    fn key_ids_follow_the_clock() {
        let generator = RsaKeyGenerator::default();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first: i64 = generator.next_key_id(at).parse().unwrap();
        let later: i64 = generator
            .next_key_id(at + Duration::hours(12))
            .parse()
            .unwrap();
        assert_eq!(later - first, Duration::hours(12).num_nanoseconds().unwrap());
    }

    #[test]
    fn generates_rsa_key_with_requested_expiry() {
        let generator = RsaKeyGenerator::new(2048, SigningAlgorithm::PS256).unwrap();
        let now = Utc::now();
        let info = generator.generate(now, now + Duration::hours(24)).unwrap();

        assert_eq!(info.signing_algorithm(), SigningAlgorithm::PS256);
        assert_eq!(info.expiry_date(), now + Duration::hours(24));
        assert_eq!(info.key().family(), KeyFamily::Rsa);
        assert_eq!(info.key_id(), now.timestamp_nanos_opt().unwrap().to_string());
    }
}
