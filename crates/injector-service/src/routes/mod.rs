use crate::handlers::{discovery_handler, mutate_handler, refresh_handler, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Request deadline on the webhook listener. The API server gives admission
/// webhooks a bounded budget; an abandoned request relies on upsert
/// idempotency for a safe retry, so no rollback runs here.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Refresh sweeps walk every managed record and get a wider budget.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(60);

/// Routes served on the webhook listener (called by the API server and the
/// external refresh trigger).
pub fn webhook_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/mutate",
            post(mutate_handler::handle_mutate).layer(TimeoutLayer::new(WEBHOOK_TIMEOUT)),
        )
        .route(
            "/refresh",
            post(refresh_handler::handle_refresh).layer(TimeoutLayer::new(REFRESH_TIMEOUT)),
        )
        .route("/healthz", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Routes served on the discovery listener (read-only projection consumed
/// by the external trust boundary).
pub fn discovery_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(discovery_handler::handle_openid_configuration),
        )
        .route("/keys", get(discovery_handler::handle_jwks))
        .route("/healthz", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "ok"
}
