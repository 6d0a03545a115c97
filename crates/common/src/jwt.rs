//! JWT utilities shared across the injector's token paths.
//!
//! This module provides the pieces of JWT handling that do not depend on any
//! particular key: a size limit applied before parsing, and `kid` extraction
//! from an unverified header so the right verification key can be looked up.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any base64 decoding or signature work,
//!   so oversized payloads are rejected with minimal resource usage.
//! - `extract_kid` never validates the token. Callers MUST verify the
//!   signature with the resolved key before trusting any claim.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

/// Maximum allowed JWT size in bytes (8KB).
///
/// Typical identity tokens here are 700-900 bytes (RS256 signature plus a
/// small claim set). The limit leaves room for growth while rejecting
/// oversized tokens before any parsing or cryptographic operation runs.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Errors produced while inspecting a token's structure.
///
/// These cover only the pre-verification phase; signature and expiry
/// failures are reported by the verification layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtParseError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds maximum allowed size")]
    TokenTooLarge,

    /// Token is not shaped like a compact JWS (header.payload.signature).
    #[error("token is not a valid JWT")]
    MalformedToken,

    /// Token header has no `kid` field.
    #[error("token header is missing a key id")]
    MissingKid,
}

/// Extract the `kid` (key ID) from a JWT header without verifying the
/// signature.
///
/// Used to look up the correct verification key when multiple keys are
/// active. The token MUST still be verified against the resolved key.
pub fn extract_kid(token: &str) -> Result<String, JwtParseError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        return Err(JwtParseError::TokenTooLarge);
    }

    // Compact JWS format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(JwtParseError::MalformedToken);
    }
    let header_b64 = parts.first().ok_or(JwtParseError::MalformedToken)?;

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| JwtParseError::MalformedToken)?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| JwtParseError::MalformedToken)?;

    header
        .get("kid")
        .and_then(|kid| kid.as_str())
        .map(ToString::to_string)
        .ok_or(JwtParseError::MissingKid)
}
