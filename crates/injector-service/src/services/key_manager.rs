use crate::config::{COMPONENT_LABEL, KEY_COMPONENT, MANAGED_BY_LABEL, MANAGER_NAME};
use crate::crypto;
use crate::errors::Error;
use crate::models::{Jwks, SigningKeyPair};
use crate::repositories::SecretStore;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};

/// The fixed-size set of signing key pairs trusted by one running instance.
///
/// Construction is two-phase and explicit: raw persisted material goes in
/// once at startup, a fully validated set comes out, and nothing mutates it
/// afterwards. Concurrent reads need no synchronization.
pub struct KeyManager {
    keys: Vec<SigningKeyPair>,
    by_kid: HashMap<String, usize>,
    generated: usize,
}

impl KeyManager {
    /// Build the key set from previously persisted pairs, generating
    /// `max(0, count - persisted)` fresh pairs to reach the configured size.
    ///
    /// Every persisted pair is parse-validated up front; a single malformed
    /// pair fails the whole initialization so the process never serves with
    /// a short or partially trusted set.
    #[instrument(skip_all, fields(persisted = persisted.len(), count))]
    pub fn initialize(persisted: Vec<SigningKeyPair>, count: usize) -> Result<Self, Error> {
        for pair in &persisted {
            crypto::validate_key_pair(pair)?;
        }

        let mut keys = persisted;
        if keys.len() > count {
            warn!(
                held = keys.len(),
                configured = count,
                "More persisted key pairs than configured; keeping all so previously issued tokens stay verifiable"
            );
        }

        let shortfall = count.saturating_sub(keys.len());
        for _ in 0..shortfall {
            keys.push(crypto::generate_key_pair()?);
        }
        if shortfall > 0 {
            info!(generated = shortfall, "Generated signing key pairs");
        }

        let mut by_kid = HashMap::with_capacity(keys.len());
        for (index, pair) in keys.iter().enumerate() {
            if by_kid.insert(pair.kid.clone(), index).is_some() {
                return Err(Error::KeyMaterial(format!(
                    "duplicate key id '{}' in persisted key set",
                    pair.kid
                )));
            }
        }

        Ok(KeyManager {
            keys,
            by_kid,
            generated: shortfall,
        })
    }

    /// Pick a signing key uniformly at random among all members.
    ///
    /// The uniform choice is a fairness policy: signing load and short-term
    /// key exposure spread across the whole set instead of favoring one
    /// member, without needing a rotation schedule.
    pub fn select_signing_key(&self) -> Result<&SigningKeyPair, Error> {
        let index = rand::thread_rng().gen_range(0..self.keys.len());
        self.keys
            .get(index)
            .ok_or_else(|| Error::Internal("signing key selection out of range".to_string()))
    }

    /// Resolve the pair that signed a token by its `kid`.
    ///
    /// An unknown `kid` means the token was minted under a key set this
    /// instance does not hold; that is a hard failure, never retried.
    pub fn resolve_verification_key(&self, kid: &str) -> Result<&SigningKeyPair, Error> {
        self.by_kid
            .get(kid)
            .and_then(|index| self.keys.get(*index))
            .ok_or_else(|| Error::UnknownKey(kid.to_string()))
    }

    /// Export every public key in JWKS form. Side-effect free; the result
    /// can be computed once and cached for the process lifetime because the
    /// set is immutable after initialization.
    pub fn export_public_set(&self) -> Result<Jwks, Error> {
        let keys = self
            .keys
            .iter()
            .map(crypto::public_jwk)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Jwks { keys })
    }

    pub fn keys(&self) -> &[SigningKeyPair] {
        &self.keys
    }

    /// How many pairs `initialize` had to generate (zero once the persisted
    /// set has reached its fixed point).
    pub fn generated_count(&self) -> usize {
        self.generated
    }
}

/// Secret name for one persisted key pair, derived from the kid's leading
/// hex so names stay stable across restarts.
fn key_secret_name(pair: &SigningKeyPair) -> String {
    let prefix = pair.kid.get(..8).unwrap_or(&pair.kid);
    format!("signing-key-{prefix}")
}

/// Load previously persisted key pairs from the injector's own namespace.
pub async fn load_persisted_pairs(
    store: &dyn SecretStore,
    namespace: &str,
) -> Result<Vec<SigningKeyPair>, Error> {
    let selector = format!("{COMPONENT_LABEL}={KEY_COMPONENT}");
    let records = store.list_by_label(Some(namespace), &selector).await?;

    records
        .iter()
        .map(|record| SigningKeyPair::from_secret_fields(&record.fields))
        .collect()
}

/// Persist the whole key set back to the store so the next startup finds
/// exactly the configured number of pairs and generates none.
///
/// Upserting every pair (not just the fresh ones) keeps the write path
/// idempotent across crashes between generation and persistence.
#[instrument(skip_all, fields(namespace = %namespace))]
pub async fn persist_key_set(
    store: &dyn SecretStore,
    namespace: &str,
    manager: &KeyManager,
) -> Result<(), Error> {
    let labels = BTreeMap::from([
        (COMPONENT_LABEL.to_string(), KEY_COMPONENT.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string()),
    ]);

    for pair in manager.keys() {
        let name = key_secret_name(pair);
        let fields = pair.to_secret_fields();

        match store.get(namespace, &name).await? {
            Some(_) => store.patch_fields(namespace, &name, &fields).await?,
            None => match store.create(namespace, &name, &fields, &labels).await {
                Ok(()) => {}
                // Another replica won the create race; the pair is persisted.
                Err(err) if err.is_conflict() => {
                    store.patch_fields(namespace, &name, &fields).await?;
                }
                Err(err) => return Err(err),
            },
        }
    }

    Ok(())
}

/// Convenience for startup and tests: list, validate, top up, write back.
pub async fn bootstrap_key_set(
    store: &dyn SecretStore,
    namespace: &str,
    count: usize,
) -> Result<KeyManager, Error> {
    let persisted = load_persisted_pairs(store, namespace).await?;
    let manager = KeyManager::initialize(persisted, count)?;
    persist_key_set(store, namespace, &manager).await?;
    Ok(manager)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::SecretRecord;
    use crate::repositories::MemorySecretStore;
    use common::secret::SecretString;
    use std::collections::HashSet;
    use std::sync::LazyLock;

    // RSA generation is expensive in debug builds; share fixtures.
    static PAIR_A: LazyLock<SigningKeyPair> =
        LazyLock::new(|| crypto::generate_key_pair().expect("key generation"));
    static PAIR_B: LazyLock<SigningKeyPair> =
        LazyLock::new(|| crypto::generate_key_pair().expect("key generation"));

    #[test]
    fn test_initialize_generates_shortfall() {
        // k = 1 persisted, N = 2: exactly one pair is freshly generated.
        let manager = KeyManager::initialize(vec![PAIR_A.clone()], 2).unwrap();

        assert_eq!(manager.keys().len(), 2);
        assert_eq!(manager.generated_count(), 1);
        assert!(manager.keys().iter().any(|pair| pair.kid == PAIR_A.kid));
    }

    #[test]
    fn test_initialize_from_empty_generates_full_set() {
        let manager = KeyManager::initialize(vec![], 2).unwrap();
        assert_eq!(manager.keys().len(), 2);
        assert_eq!(manager.generated_count(), 2);

        let kids: HashSet<_> = manager.keys().iter().map(|pair| pair.kid.clone()).collect();
        assert_eq!(kids.len(), 2, "kids must be unique");
    }

    #[test]
    fn test_initialize_at_fixed_point_generates_none() {
        let manager =
            KeyManager::initialize(vec![PAIR_A.clone(), PAIR_B.clone()], 2).unwrap();
        assert_eq!(manager.keys().len(), 2);
        assert_eq!(manager.generated_count(), 0);
    }

    #[test]
    fn test_initialize_rejects_malformed_persisted_pair() {
        let broken = SigningKeyPair {
            kid: "deadbeef".to_string(),
            public_key_pem: "not a pem".to_string(),
            private_key_pem: SecretString::from("not a pem"),
        };

        let err = KeyManager::initialize(vec![broken], 2).expect_err("must fail");
        assert!(matches!(err, Error::KeyMaterial(_)));
    }

    #[test]
    fn test_initialize_rejects_duplicate_kids() {
        let err = KeyManager::initialize(vec![PAIR_A.clone(), PAIR_A.clone()], 2)
            .expect_err("duplicate kids must fail");
        assert!(matches!(err, Error::KeyMaterial(_)));
    }

    #[test]
    fn test_initialize_keeps_surplus_pairs() {
        // Operator drift: more persisted pairs than configured. They stay
        // verifiable rather than being silently dropped.
        let manager =
            KeyManager::initialize(vec![PAIR_A.clone(), PAIR_B.clone()], 1).unwrap();
        assert_eq!(manager.keys().len(), 2);
        assert_eq!(manager.generated_count(), 0);
    }

    #[test]
    fn test_resolve_verification_key() {
        let manager = KeyManager::initialize(vec![PAIR_A.clone()], 1).unwrap();

        let resolved = manager.resolve_verification_key(&PAIR_A.kid).unwrap();
        assert_eq!(resolved.kid, PAIR_A.kid);

        let err = manager
            .resolve_verification_key("0000000000000000000000000000000000000000")
            .expect_err("unknown kid");
        assert!(matches!(err, Error::UnknownKey(kid) if kid.starts_with("0000")));
    }

    #[test]
    fn test_select_signing_key_covers_all_members() {
        let manager =
            KeyManager::initialize(vec![PAIR_A.clone(), PAIR_B.clone()], 2).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(manager.select_signing_key().unwrap().kid.clone());
        }
        // Uniform random selection over 2 keys reaches both in 200 draws
        // (miss probability 2^-199).
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_export_public_set_matches_key_set() {
        let manager =
            KeyManager::initialize(vec![PAIR_A.clone(), PAIR_B.clone()], 2).unwrap();
        let jwks = manager.export_public_set().unwrap();

        assert_eq!(jwks.keys.len(), 2);
        let exported: HashSet<_> = jwks.keys.iter().map(|key| key.kid.clone()).collect();
        let held: HashSet<_> = manager.keys().iter().map(|pair| pair.kid.clone()).collect();
        assert_eq!(exported, held);

        for key in &jwks.keys {
            assert_eq!(key.kty, "RSA");
            assert_eq!(key.use_, "sig");
            assert_eq!(key.alg, "RS256");
            assert!(!key.n.is_empty());
            assert!(!key.e.is_empty());
        }
    }

    #[tokio::test]
    async fn test_bootstrap_reaches_fixed_point() {
        let store = MemorySecretStore::new();

        // First boot: everything is generated and persisted.
        let first = bootstrap_key_set(&store, "pod-identity-injector", 2)
            .await
            .unwrap();
        assert_eq!(first.generated_count(), 2);
        assert_eq!(store.len(), 2);

        // Second boot against the same store: nothing new is generated and
        // the set is byte-identical.
        let second = bootstrap_key_set(&store, "pod-identity-injector", 2)
            .await
            .unwrap();
        assert_eq!(second.generated_count(), 0);
        assert_eq!(store.len(), 2);

        let first_kids: HashSet<_> = first.keys().iter().map(|pair| pair.kid.clone()).collect();
        let second_kids: HashSet<_> =
            second.keys().iter().map(|pair| pair.kid.clone()).collect();
        assert_eq!(first_kids, second_kids);
    }

    #[tokio::test]
    async fn test_persisted_secret_round_trips_pem_material() {
        let store = MemorySecretStore::new();
        let manager = KeyManager::initialize(vec![PAIR_A.clone()], 1).unwrap();
        persist_key_set(&store, "pod-identity-injector", &manager)
            .await
            .unwrap();

        let restored = load_persisted_pairs(&store, "pod-identity-injector")
            .await
            .unwrap();
        let pair = restored.first().unwrap();
        assert_eq!(pair.kid, PAIR_A.kid);
        assert_eq!(pair.public_key_pem, PAIR_A.public_key_pem);
    }

    #[tokio::test]
    async fn test_load_rejects_incomplete_persisted_secret() {
        let store = MemorySecretStore::new();
        store
            .insert(SecretRecord {
                namespace: "pod-identity-injector".to_string(),
                name: "signing-key-broken".to_string(),
                fields: BTreeMap::from([("kid".to_string(), "deadbeef".to_string())]),
                labels: BTreeMap::from([
                    (COMPONENT_LABEL.to_string(), KEY_COMPONENT.to_string()),
                ]),
            })
            .unwrap();

        let err = load_persisted_pairs(&store, "pod-identity-injector")
            .await
            .expect_err("incomplete pair must fail");
        assert!(matches!(err, Error::KeyMaterial(_)));
    }
}
