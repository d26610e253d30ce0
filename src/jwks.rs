//! The public key set.
//!
//! Serves the JSON Web Key Set (JWKS) containing the public half of every
//! key that can still validate a token issued by this provider.

use crate::{key::SigningKeyInfo, server::AppState};
use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The `{"keys": [...]}` document relying parties fetch to validate tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    pub fn from_keys(keys: &[SigningKeyInfo]) -> Self {
        Self {
            keys: keys.iter().map(SigningKeyInfo::jwk).collect(),
        }
    }
}

/// Public half of one signing key (RFC 7517). Only RSA keys are published,
/// so `n` and `e` are always present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    /// Matches the `kid` header of every token signed with this key.
    pub kid: String,
    /// base64url modulus.
    pub n: String,
    /// base64url public exponent.
    pub e: String,
    pub alg: String,
    /// Always "sig".
    pub r#use: String,
}

/// Handler for the `/jwks` endpoint.
///
/// Keys come straight from the lifecycle manager, so a key evicted since
/// the last request is no longer published.
#[tracing::instrument(skip(state))]
pub async fn jwks(State(state): State<Arc<AppState>>) -> Result<Json<Jwks>, StatusCode> {
    let keys = state.keys.validation_keys().await.map_err(|e| {
        tracing::error!("Failed to load validation keys: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    tracing::debug!(count = keys.len(), "serving jwks");
    Ok(Json(Jwks::from_keys(&keys)))
}
