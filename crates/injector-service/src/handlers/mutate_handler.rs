use crate::errors::Error;
use crate::handlers::AppState;
use crate::models::{AdmissionReviewRequest, AdmissionReviewResponse, MutationDecision};
use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::instrument;

/// Handle a mutating admission review.
///
/// POST /mutate
///
/// Non-eligible requests are allowed unmodified. Eligible requests come
/// back allowed with a base64-encoded JSON Patch. Any failure after
/// eligibility (token issuance, record persistence) surfaces as an error
/// response — never as an allowed review with a dangling patch.
#[instrument(name = "webhook.mutate", skip_all, fields(uid = %review.request.uid))]
pub async fn handle_mutate(
    State(state): State<Arc<AppState>>,
    Json(review): Json<AdmissionReviewRequest>,
) -> Result<Json<AdmissionReviewResponse>, Error> {
    let decision = state.mutation.decide(&review.request).await?;

    let response = match decision {
        MutationDecision::NoOp => AdmissionReviewResponse::allowed(&review.request.uid),
        MutationDecision::Patch(operations) => {
            let patch = serde_json::to_vec(&operations)
                .map_err(|e| Error::Internal(format!("patch serialization failed: {e}")))?;
            AdmissionReviewResponse::patched(&review.request.uid, STANDARD.encode(patch))
        }
    };

    Ok(Json(response))
}
