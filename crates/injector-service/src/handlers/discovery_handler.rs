use crate::handlers::AppState;
use crate::models::{Jwks, OpenIdConfiguration};
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Serve the OpenID provider configuration.
///
/// GET /.well-known/openid-configuration
///
/// The document is static for the process lifetime and precomputed at
/// startup.
#[instrument(name = "discovery.openid_configuration", skip_all)]
pub async fn handle_openid_configuration(
    State(state): State<Arc<AppState>>,
) -> Json<OpenIdConfiguration> {
    Json(state.openid_configuration.clone())
}

/// Serve the JSON Web Key Set.
///
/// GET /keys
///
/// The key set is immutable after initialization, so the JWKS is
/// precomputed and clients may cache it for an hour.
#[instrument(name = "discovery.jwks", skip_all)]
pub async fn handle_jwks(State(state): State<Arc<AppState>>) -> (HeaderMap, Json<Jwks>) {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));

    (headers, Json(state.jwks.clone()))
}
