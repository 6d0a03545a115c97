//! Cluster Secret access layer.
//!
//! Everything this service persists — signing key pairs and issued token
//! records — lives in Kubernetes Secrets. The [`SecretStore`] trait is the
//! seam between the decision logic and the cluster: production uses
//! [`KubeSecretStore`], tests use [`MemorySecretStore`].

mod memory;
mod secrets;

pub use memory::MemorySecretStore;
pub use secrets::KubeSecretStore;

use crate::errors::Error;
use crate::models::SecretRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Namespace-scoped Secret operations plus the cross-namespace label
/// listing used by the refresh sweep.
///
/// The store provides no locking; per-object create/patch serialization on
/// the API server side is the only consistency guarantee callers rely on.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// List Secrets matching a `k=v[,k=v...]` label selector. `namespace:
    /// None` spans all namespaces.
    async fn list_by_label(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<SecretRecord>, Error>;

    /// Fetch one Secret, `None` when absent.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretRecord>, Error>;

    /// Create a Secret. Fails with [`Error::StoreConflict`] when the name is
    /// already taken, which callers treat as losing a benign create race.
    async fn create(
        &self,
        namespace: &str,
        name: &str,
        fields: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Merge the given fields into an existing Secret's data.
    async fn patch_fields(
        &self,
        namespace: &str,
        name: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// True when `labels` satisfies every `k=v` clause of `selector`.
pub(crate) fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|clause| !clause.is_empty())
        .all(|clause| match clause.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => false,
        })
}
