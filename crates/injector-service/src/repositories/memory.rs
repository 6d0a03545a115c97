use crate::errors::Error;
use crate::models::SecretRecord;
use crate::repositories::{matches_selector, SecretStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory [`SecretStore`] used by unit and integration tests, mirroring
/// the API server's per-object create/patch semantics (create conflicts on
/// an existing name, patch merges fields into an existing object).
#[derive(Default)]
pub struct MemorySecretStore {
    objects: Mutex<BTreeMap<(String, String), SecretRecord>>,
    fail_writes: bool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        MemorySecretStore::default()
    }

    /// A store whose writes all fail, for exercising abort paths.
    pub fn failing() -> Self {
        MemorySecretStore {
            objects: Mutex::new(BTreeMap::new()),
            fail_writes: true,
        }
    }

    /// Seed a record directly, bypassing create semantics.
    pub fn insert(&self, record: SecretRecord) -> Result<(), Error> {
        let mut objects = self.lock()?;
        objects.insert((record.namespace.clone(), record.name.clone()), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), SecretRecord>>, Error> {
        self.objects
            .lock()
            .map_err(|_| Error::Internal("secret store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn list_by_label(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<SecretRecord>, Error> {
        let objects = self.lock()?;
        Ok(objects
            .values()
            .filter(|record| namespace.is_none_or(|ns| record.namespace == ns))
            .filter(|record| matches_selector(&record.labels, selector))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretRecord>, Error> {
        let objects = self.lock()?;
        Ok(objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        fields: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        if self.fail_writes {
            return Err(Error::Store("injected write failure".to_string()));
        }

        let mut objects = self.lock()?;
        let key = (namespace.to_string(), name.to_string());
        if objects.contains_key(&key) {
            return Err(Error::StoreConflict(format!(
                "secret '{name}' already exists"
            )));
        }

        objects.insert(
            key,
            SecretRecord {
                namespace: namespace.to_string(),
                name: name.to_string(),
                fields: fields.clone(),
                labels: labels.clone(),
            },
        );
        Ok(())
    }

    async fn patch_fields(
        &self,
        namespace: &str,
        name: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        if self.fail_writes {
            return Err(Error::Store("injected write failure".to_string()));
        }

        let mut objects = self.lock()?;
        let record = objects
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::Store(format!("secret '{name}' not found")))?;

        for (key, value) in fields {
            record.fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
