//! Integration tests for the discovery listener: the OpenID configuration
//! document and the JWKS projection of the key set.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{eligible_admission_review, TestServer};
use injector_service::models::Jwks;
use injector_service::repositories::SecretStore;
use reqwest::StatusCode;
use std::collections::HashSet;

#[tokio::test]
async fn test_openid_configuration_document() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await;

    let response = reqwest::get(format!(
        "{}/.well-known/openid-configuration",
        server.discovery_url
    ))
    .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["issuer"], "https://oidc.example.com");
    assert_eq!(body["jwks_uri"], "https://oidc.example.com/keys");
    assert_eq!(
        body["response_types_supported"],
        serde_json::json!(["id_token"])
    );
    assert_eq!(
        body["subject_types_supported"],
        serde_json::json!(["public"])
    );
    assert_eq!(
        body["id_token_signing_alg_values_supported"],
        serde_json::json!(["RS256"])
    );

    Ok(())
}

#[tokio::test]
async fn test_jwks_endpoint_exports_full_key_set() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await;

    let response = reqwest::get(format!("{}/keys", server.discovery_url)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|value| value.to_str().ok()),
        Some("max-age=3600")
    );

    let jwks: Jwks = response.json().await?;
    assert_eq!(jwks.keys.len(), 2);
    for key in &jwks.keys {
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.use_, "sig");
        assert_eq!(key.alg, "RS256");
        assert!(!key.n.is_empty());
        assert!(!key.e.is_empty());
    }

    Ok(())
}

/// Every token the webhook mints is verifiable against a key published by
/// the JWKS endpoint: the external trust boundary sees a closed loop.
#[tokio::test]
async fn test_issued_tokens_reference_published_keys() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/mutate", server.webhook_url))
        .json(&eligible_admission_review("uid-jwks"))
        .send()
        .await?;

    let record = server
        .store
        .get("ns1", "worker-web-identity-token")
        .await
        .unwrap()
        .expect("token record");
    let token = record
        .fields
        .get(injector_service::models::TOKEN_FIELD)
        .unwrap();
    let kid = common::extract_header_kid(token);

    let jwks: Jwks = reqwest::get(format!("{}/keys", server.discovery_url))
        .await?
        .json()
        .await?;
    let published: HashSet<String> = jwks.keys.into_iter().map(|key| key.kid).collect();
    assert!(published.contains(&kid));

    Ok(())
}

#[tokio::test]
async fn test_discovery_health_endpoint() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await;

    let response = reqwest::get(format!("{}/healthz", server.discovery_url)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "ok");

    Ok(())
}
