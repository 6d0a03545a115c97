use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A persisted key pair could not be parsed. Fatal at startup: the
    /// process must not serve with a short key set.
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// A token references a `kid` that is not in the active key set.
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    /// A token is malformed, tampered with, or signed by a foreign key.
    #[error("Invalid token signature: {0}")]
    Signature(String),

    /// A token's `exp` is at or before the current time.
    #[error("Token expired")]
    Expired,

    /// The cluster store failed an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// The cluster store rejected a create because the object exists.
    /// Callers treat this as "lost the create race" and fall back to a patch.
    #[error("Store conflict: {0}")]
    StoreConflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is a store-level already-exists conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::StoreConflict(_))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Error::KeyMaterial(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "KEY_MATERIAL_ERROR",
                "An internal cryptographic error occurred".to_string(),
            ),
            Error::UnknownKey(_) | Error::Signature(_) | Error::Expired => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "The identity token is invalid or expired".to_string(),
            ),
            Error::Store(_) | Error::StoreConflict(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                "An internal store error occurred".to_string(),
            ),
            Error::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
