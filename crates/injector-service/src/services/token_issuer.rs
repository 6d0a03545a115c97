use crate::config::Config;
use crate::crypto;
use crate::errors::Error;
use crate::models::{IdentityClaims, VerifiedToken, WorkloadIdentity};
use crate::services::key_manager::KeyManager;
use common::jwt::{extract_kid, JwtParseError, MAX_JWT_SIZE_BYTES};
use std::sync::Arc;
use tracing::instrument;

/// Encodes and decodes the identity claim schema with the key set as the
/// trust root.
pub struct TokenIssuer {
    keys: Arc<KeyManager>,
    issuer: String,
    audience: String,
    token_ttl_seconds: i64,
}

impl TokenIssuer {
    pub fn new(keys: Arc<KeyManager>, config: &Config) -> Self {
        TokenIssuer {
            keys,
            issuer: config.issuer_url.clone(),
            audience: config.audience.clone(),
            token_ttl_seconds: config.token_ttl_seconds,
        }
    }

    /// Issue a token for a workload identity: random signing key, configured
    /// issuer/audience, `iat` = now, `exp` = now + lifetime.
    #[instrument(skip_all)]
    pub fn sign(&self, identity: &WorkloadIdentity) -> Result<String, Error> {
        self.issue(identity.subject(), identity.name.clone(), identity.group.clone())
    }

    /// Re-issue a token for claims recovered from a previously issued one,
    /// preserving its subject binding with a fresh validity window.
    #[instrument(skip_all)]
    pub fn reissue(&self, claims: &IdentityClaims) -> Result<String, Error> {
        self.issue(claims.sub.clone(), claims.name.clone(), claims.group.clone())
    }

    fn issue(&self, sub: String, name: String, group: String) -> Result<String, Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = IdentityClaims {
            sub,
            name,
            group,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.token_ttl_seconds,
        };

        let pair = self.keys.select_signing_key()?;
        crypto::sign_claims(&claims, pair)
    }

    /// Verify a token and return its claims. Fails with
    /// [`Error::Expired`] once `exp` has passed.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, Error> {
        let verified = self.verify_allow_expired(token)?;
        if verified.expired {
            return Err(Error::Expired);
        }
        Ok(verified.claims)
    }

    /// Verify a token's signature, reporting expiry as data instead of an
    /// error.
    ///
    /// This is the refresh path's entry point: an expired-but-authentic
    /// token yields its claims for re-signing, while `Signature` and
    /// `UnknownKey` failures still propagate — re-signing a token this
    /// instance never issued would forge continuity of identity.
    #[instrument(skip_all)]
    pub fn verify_allow_expired(&self, token: &str) -> Result<VerifiedToken, Error> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            return Err(Error::Signature(
                "token exceeds maximum allowed size".to_string(),
            ));
        }

        let kid = extract_kid(token).map_err(|err| match err {
            JwtParseError::MissingKid => {
                Error::Signature("token header has no key id".to_string())
            }
            other => Error::Signature(other.to_string()),
        })?;

        let pair = self.keys.resolve_verification_key(&kid)?;
        let claims = crypto::verify_with_key(token, pair)?;

        let now = chrono::Utc::now().timestamp();
        let expired = claims.exp <= now;

        Ok(VerifiedToken { claims, expired })
    }
}
