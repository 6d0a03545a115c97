mod config;
mod crypto;
mod errors;
mod handlers;
mod models;
mod repositories;
mod routes;
mod services;

use config::Config;
use handlers::AppState;
use models::OpenIdConfiguration;
use repositories::{KubeSecretStore, SecretStore};
use services::key_manager;
use services::mutation::MutationController;
use services::refresh::RefreshScheduler;
use services::token_issuer::TokenIssuer;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "injector_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pod Identity Injector");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        issuer = %config.issuer_url,
        namespace = %config.namespace,
        key_count = config.key_count,
        "Configuration loaded"
    );

    // Connect to the cluster
    let client = kube::Client::try_default().await.map_err(|e| {
        error!("Failed to build Kubernetes client: {}", e);
        e
    })?;
    let store: Arc<dyn SecretStore> = Arc::new(KubeSecretStore::new(client));

    // Bring the key set to its fixed point: load persisted pairs, top up to
    // the configured count, write everything back. A malformed persisted
    // pair is fatal here; serving with a short key set is worse than not
    // serving.
    info!("Initializing signing key set...");
    let keys = key_manager::bootstrap_key_set(store.as_ref(), &config.namespace, config.key_count)
        .await
        .map_err(|e| {
            error!("Failed to initialize signing key set: {}", e);
            e
        })?;
    info!(
        held = keys.keys().len(),
        generated = keys.generated_count(),
        "Signing key set ready"
    );

    let keys = Arc::new(keys);
    let jwks = keys.export_public_set()?;
    let issuer = Arc::new(TokenIssuer::new(keys, &config));

    let state = Arc::new(AppState {
        mutation: MutationController::new(issuer.clone(), store.clone(), config.clone()),
        refresh: RefreshScheduler::new(issuer, store, config.refresh_margin_seconds),
        openid_configuration: OpenIdConfiguration::for_issuer(&config.issuer_url),
        jwks,
        config: config.clone(),
    });

    let webhook_app = routes::webhook_routes(state.clone());
    let discovery_app = routes::discovery_routes(state);

    let webhook_addr: SocketAddr = config.webhook_bind_address.parse().map_err(|e| {
        error!("Invalid webhook bind address: {}", e);
        e
    })?;
    let discovery_addr: SocketAddr = config.discovery_bind_address.parse().map_err(|e| {
        error!("Invalid discovery bind address: {}", e);
        e
    })?;

    let webhook_listener = tokio::net::TcpListener::bind(webhook_addr).await?;
    let discovery_listener = tokio::net::TcpListener::bind(discovery_addr).await?;

    info!("Webhook listening on {}", webhook_addr);
    info!("Discovery listening on {}", discovery_addr);

    tokio::try_join!(
        axum::serve(webhook_listener, webhook_app).into_future(),
        axum::serve(discovery_listener, discovery_app).into_future(),
    )?;

    Ok(())
}
