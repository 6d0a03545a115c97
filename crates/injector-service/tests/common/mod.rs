//! Shared harness for integration tests: an in-memory store behind real
//! HTTP listeners, so tests exercise the same routers the binary serves.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use injector_service::config::Config;
use injector_service::handlers::AppState;
use injector_service::models::OpenIdConfiguration;
use injector_service::repositories::MemorySecretStore;
use injector_service::routes;
use injector_service::services::key_manager::KeyManager;
use injector_service::services::mutation::MutationController;
use injector_service::services::refresh::RefreshScheduler;
use injector_service::services::token_issuer::TokenIssuer;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Key material is expensive to generate; every test server shares one
/// immutable key set, exactly as replicas of the real service would after
/// reading the same persisted Secrets.
static SHARED_KEYS: LazyLock<Arc<KeyManager>> = LazyLock::new(|| {
    Arc::new(KeyManager::initialize(vec![], 2).expect("test key set"))
});

pub fn test_config() -> Config {
    let vars = HashMap::from([
        (
            "ISSUER_URL".to_string(),
            "https://oidc.example.com".to_string(),
        ),
        ("KEY_COUNT".to_string(), "2".to_string()),
    ]);
    Config::from_vars(&vars).expect("test config")
}

pub struct TestServer {
    pub webhook_url: String,
    pub discovery_url: String,
    pub store: Arc<MemorySecretStore>,
    pub issuer: Arc<TokenIssuer>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with_store(Arc::new(MemorySecretStore::new())).await
    }

    pub async fn spawn_failing_store() -> Self {
        Self::spawn_with_store(Arc::new(MemorySecretStore::failing())).await
    }

    async fn spawn_with_store(store: Arc<MemorySecretStore>) -> Self {
        let config = test_config();
        let issuer = Arc::new(TokenIssuer::new(SHARED_KEYS.clone(), &config));

        let state = Arc::new(AppState {
            mutation: MutationController::new(issuer.clone(), store.clone(), config.clone()),
            refresh: RefreshScheduler::new(
                issuer.clone(),
                store.clone(),
                config.refresh_margin_seconds,
            ),
            openid_configuration: OpenIdConfiguration::for_issuer(&config.issuer_url),
            jwks: SHARED_KEYS.export_public_set().expect("jwks"),
            config,
        });

        let webhook_url = serve(routes::webhook_routes(state.clone())).await;
        let discovery_url = serve(routes::discovery_routes(state)).await;

        TestServer {
            webhook_url,
            discovery_url,
            store,
            issuer,
        }
    }
}

async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{addr}")
}

/// Extract the `kid` a token was signed under.
pub fn extract_header_kid(token: &str) -> String {
    ::common::jwt::extract_kid(token).expect("token kid")
}

/// Look up one of the shared test pairs by `kid`.
pub fn pair_by_kid(kid: &str) -> injector_service::models::SigningKeyPair {
    SHARED_KEYS
        .resolve_verification_key(kid)
        .expect("kid in shared key set")
        .clone()
}

/// An AdmissionReview for a pod that qualifies for injection.
pub fn eligible_admission_review(uid: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "namespace": "ns1",
            "object": {
                "metadata": {
                    "name": "worker",
                    "namespace": "ns1",
                    "annotations": {
                        "iam.amazonaws.com/role": "arn:aws:iam::123:role/x"
                    }
                },
                "spec": {
                    "serviceAccountName": "worker",
                    "containers": [{"name": "app"}]
                }
            }
        }
    })
}
