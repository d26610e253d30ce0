//! HTTP surface: the discovery document and the public key set.

use std::sync::Arc;

use axum::{Router, extract::State, response::Json, routing::get};
use serde::{Deserialize, Serialize};

use crate::{jwks, manager::KeyLifecycleManager};

pub struct AppState {
    /// The base URL identifying this provider.
    pub issuer: String,
    pub keys: Arc<KeyLifecycleManager>,
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(openid_configuration),
        )
        .route("/jwks", get(jwks::jwks))
        .route("/.well-known/jwks.json", get(jwks::jwks))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OIDCConfig {
    pub issuer: String,
    pub jwks_uri: String,
    pub id_token_signing_alg_values_supported: Vec<String>,
}

async fn openid_configuration(State(state): State<Arc<AppState>>) -> Json<OIDCConfig> {
    let issuer = state.issuer.trim_end_matches('/');
    Json(OIDCConfig {
        issuer: issuer.to_string(),
        jwks_uri: format!("{issuer}/jwks"),
        id_token_signing_alg_values_supported: vec![
            state.keys.signing_algorithm().as_str().to_string(),
        ],
    })
}
