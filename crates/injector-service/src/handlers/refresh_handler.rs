use crate::errors::Error;
use crate::handlers::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub success: bool,
}

/// Trigger one refresh sweep over every managed token record.
///
/// POST /refresh
///
/// The caller is an external time-based scheduler; per-record failures are
/// logged inside the sweep and do not fail the request. Only a failure to
/// list the records at all surfaces as an error.
#[instrument(name = "webhook.refresh", skip_all)]
pub async fn handle_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, Error> {
    state.refresh.sweep().await?;
    Ok(Json(RefreshResponse { success: true }))
}
