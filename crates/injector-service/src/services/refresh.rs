use crate::config::{COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGER_NAME, TOKEN_COMPONENT};
use crate::errors::Error;
use crate::models::{SweepReport, TOKEN_FIELD};
use crate::repositories::SecretStore;
use crate::services::token_issuer::TokenIssuer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Re-signs previously issued tokens before they expire inside long-running
/// workloads.
///
/// The scheduler owns no timer: an external time-based trigger invokes
/// [`RefreshScheduler::sweep`] over the refresh endpoint, keeping the sweep
/// cadence an operator concern independent of the token lifetime.
pub struct RefreshScheduler {
    issuer: Arc<TokenIssuer>,
    store: Arc<dyn SecretStore>,
    refresh_margin_seconds: i64,
}

impl RefreshScheduler {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        store: Arc<dyn SecretStore>,
        refresh_margin_seconds: i64,
    ) -> Self {
        RefreshScheduler {
            issuer,
            store,
            refresh_margin_seconds,
        }
    }

    /// One pass over every managed token record, in any namespace.
    ///
    /// Expired tokens and tokens within the refresh margin of expiry are
    /// re-signed in place. Records signed by a key this instance does not
    /// hold are skipped and reported, never rewritten — reviving them would
    /// forge continuity of an identity this trust root never asserted.
    /// Per-record failures never abort the sweep.
    #[instrument(skip_all)]
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        let selector = format!(
            "{COMPONENT_LABEL}={TOKEN_COMPONENT},{MANAGED_BY_LABEL}={MANAGER_NAME}"
        );
        let records = self.store.list_by_label(None, &selector).await?;

        let mut report = SweepReport::default();
        let now = chrono::Utc::now().timestamp();

        for record in records {
            report.examined += 1;

            let Some(token) = record.fields.get(TOKEN_FIELD) else {
                warn!(
                    namespace = %record.namespace,
                    secret = %record.name,
                    "Managed record has no token field, skipping"
                );
                report.skipped += 1;
                continue;
            };

            let verified = match self.issuer.verify_allow_expired(token) {
                Ok(verified) => verified,
                Err(err @ (Error::UnknownKey(_) | Error::Signature(_))) => {
                    warn!(
                        namespace = %record.namespace,
                        secret = %record.name,
                        error = %err,
                        "Token was issued under a foreign trust root, leaving untouched"
                    );
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(
                        namespace = %record.namespace,
                        secret = %record.name,
                        error = %err,
                        "Token verification failed"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let stale =
                verified.expired || verified.claims.exp - now <= self.refresh_margin_seconds;
            if !stale {
                continue;
            }

            let fresh = match self.issuer.reissue(&verified.claims) {
                Ok(fresh) => fresh,
                Err(err) => {
                    warn!(
                        namespace = %record.namespace,
                        secret = %record.name,
                        error = %err,
                        "Re-signing failed"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let fields = BTreeMap::from([(TOKEN_FIELD.to_string(), fresh)]);
            match self
                .store
                .patch_fields(&record.namespace, &record.name, &fields)
                .await
            {
                Ok(()) => {
                    info!(
                        namespace = %record.namespace,
                        secret = %record.name,
                        sub = %verified.claims.sub,
                        "Refreshed identity token"
                    );
                    report.refreshed += 1;
                }
                Err(err) => {
                    warn!(
                        namespace = %record.namespace,
                        secret = %record.name,
                        error = %err,
                        "Failed to patch refreshed token"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            refreshed = report.refreshed,
            skipped = report.skipped,
            failed = report.failed,
            "Refresh sweep completed"
        );

        Ok(report)
    }
}
