use crate::errors::Error;
use crate::models::SecretRecord;
use crate::repositories::SecretStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{instrument, warn};

/// [`SecretStore`] backed by the Kubernetes API server.
///
/// Writes go through `stringData` so the API server handles base64
/// encoding; reads decode `data` back to UTF-8 strings (all fields this
/// service persists are PEM or JWT text).
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        KubeSecretStore { client }
    }

    fn namespaced(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn all_namespaces(&self) -> Api<Secret> {
        Api::all(self.client.clone())
    }
}

/// Map a kube error, surfacing already-exists conflicts distinctly so
/// callers can fall back to a patch after losing a create race.
fn store_error(err: kube::Error) -> Error {
    if let kube::Error::Api(ref response) = err {
        if response.code == 409 {
            return Error::StoreConflict(response.message.clone());
        }
    }
    Error::Store(err.to_string())
}

fn record_from_secret(secret: Secret) -> SecretRecord {
    let name = secret.metadata.name.unwrap_or_default();
    let namespace = secret.metadata.namespace.unwrap_or_default();
    let labels = secret.metadata.labels.unwrap_or_default();

    let mut fields = BTreeMap::new();
    for (key, value) in secret.data.unwrap_or_default() {
        match String::from_utf8(value.0) {
            Ok(text) => {
                fields.insert(key, text);
            }
            Err(_) => {
                warn!(
                    secret = %name,
                    namespace = %namespace,
                    field = %key,
                    "Skipping non-UTF-8 secret field"
                );
            }
        }
    }

    SecretRecord {
        namespace,
        name,
        fields,
        labels,
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    #[instrument(skip_all, fields(selector = %selector))]
    async fn list_by_label(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<SecretRecord>, Error> {
        let api = match namespace {
            Some(namespace) => self.namespaced(namespace),
            None => self.all_namespaces(),
        };

        let params = ListParams::default().labels(selector);
        let list = api.list(&params).await.map_err(store_error)?;

        Ok(list.items.into_iter().map(record_from_secret).collect())
    }

    #[instrument(skip_all, fields(namespace = %namespace, name = %name))]
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretRecord>, Error> {
        let secret = self
            .namespaced(namespace)
            .get_opt(name)
            .await
            .map_err(store_error)?;

        Ok(secret.map(record_from_secret))
    }

    #[instrument(skip_all, fields(namespace = %namespace, name = %name))]
    async fn create(
        &self,
        namespace: &str,
        name: &str,
        fields: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            string_data: Some(fields.clone()),
            ..Secret::default()
        };

        self.namespaced(namespace)
            .create(&PostParams::default(), &secret)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %namespace, name = %name))]
    async fn patch_fields(
        &self,
        namespace: &str,
        name: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "stringData": fields });

        self.namespaced(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(store_error)?;

        Ok(())
    }
}
