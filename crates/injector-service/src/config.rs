use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Label key identifying the functional component of a managed Secret.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Label key identifying the manager of a Secret.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on every Secret this service owns.
pub const MANAGER_NAME: &str = "pod-identity-injector";

/// Component label value for persisted signing key pairs.
pub const KEY_COMPONENT: &str = "json-web-key";

/// Component label value for issued token records.
pub const TOKEN_COMPONENT: &str = "web-identity-token";

/// Annotation that triggers mutation and carries the role to assume.
pub const ROLE_ANNOTATION: &str = "iam.amazonaws.com/role";

pub const DEFAULT_KEY_COUNT: usize = 4;
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 86_400; // 24h
pub const DEFAULT_REFRESH_MARGIN_SECONDS: i64 = 3_600; // 1h

#[derive(Debug, Clone)]
pub struct Config {
    /// Issuer URL embedded in tokens and the discovery document.
    pub issuer_url: String,
    /// Hostname part of the issuer URL; namespaces the override annotations
    /// and the in-container mount path.
    pub issuer_domain: String,
    /// Audience claim stamped into every issued token.
    pub audience: String,
    /// Namespace the injector itself runs in; signing keys persist here.
    pub namespace: String,
    /// Fixed size of the signing key set.
    pub key_count: usize,
    /// Lifetime of an issued token.
    pub token_ttl_seconds: i64,
    /// Tokens within this margin of expiry are refreshed proactively.
    /// Must be strictly smaller than `token_ttl_seconds`.
    pub refresh_margin_seconds: i64,
    /// Bind address for the mutate/refresh listener.
    pub webhook_bind_address: String,
    /// Bind address for the discovery/JWKS listener.
    pub discovery_bind_address: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer_url = vars
            .get("ISSUER_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("ISSUER_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let issuer_domain = issuer_domain(&issuer_url)?;

        let audience = vars
            .get("AUDIENCE")
            .cloned()
            .unwrap_or_else(|| "sts.amazonaws.com".to_string());

        let namespace = vars
            .get("NAMESPACE")
            .cloned()
            .unwrap_or_else(|| MANAGER_NAME.to_string());

        let key_count = parse_or(vars, "KEY_COUNT", DEFAULT_KEY_COUNT)?;
        if key_count == 0 {
            return Err(ConfigError::InvalidValue {
                name: "KEY_COUNT".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let token_ttl_seconds = parse_or(vars, "TOKEN_TTL_SECONDS", DEFAULT_TOKEN_TTL_SECONDS)?;
        if token_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "TOKEN_TTL_SECONDS".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let refresh_margin_seconds = parse_or(
            vars,
            "REFRESH_MARGIN_SECONDS",
            DEFAULT_REFRESH_MARGIN_SECONDS,
        )?;
        if refresh_margin_seconds < 0 {
            return Err(ConfigError::InvalidValue {
                name: "REFRESH_MARGIN_SECONDS".to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        // A refresh margin at or above the token lifetime would make every
        // token permanently "about to expire" and the sweep would re-sign
        // the entire fleet on every pass.
        if refresh_margin_seconds >= token_ttl_seconds {
            return Err(ConfigError::InvalidValue {
                name: "REFRESH_MARGIN_SECONDS".to_string(),
                reason: format!(
                    "must be smaller than TOKEN_TTL_SECONDS ({token_ttl_seconds})"
                ),
            });
        }

        let webhook_bind_address = vars
            .get("WEBHOOK_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8443".to_string());

        let discovery_bind_address = vars
            .get("DISCOVERY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        Ok(Config {
            issuer_url,
            issuer_domain,
            audience,
            namespace,
            key_count,
            token_ttl_seconds,
            refresh_margin_seconds,
            webhook_bind_address,
            discovery_bind_address,
        })
    }

    /// Annotation overriding the identity name (defaults to the pod's
    /// service account name).
    pub fn name_annotation(&self) -> String {
        format!("{}/name", self.issuer_domain)
    }

    /// Annotation overriding the identity group (defaults to the namespace).
    pub fn group_annotation(&self) -> String {
        format!("{}/group", self.issuer_domain)
    }

    /// Annotation listing the containers to inject, comma-separated.
    pub fn inject_containers_annotation(&self) -> String {
        format!("{}/inject-containers", self.issuer_domain)
    }

    /// In-container directory where the token volume is mounted.
    pub fn token_mount_path(&self) -> String {
        format!("/var/run/secrets/{}", self.issuer_domain)
    }

    /// Full path of the mounted token file.
    pub fn token_file_path(&self) -> String {
        format!("{}/token", self.token_mount_path())
    }
}

fn issuer_domain(issuer_url: &str) -> Result<String, ConfigError> {
    let without_scheme = issuer_url
        .strip_prefix("https://")
        .or_else(|| issuer_url.strip_prefix("http://"))
        .ok_or_else(|| ConfigError::InvalidValue {
            name: "ISSUER_URL".to_string(),
            reason: "must start with https:// or http://".to_string(),
        })?;

    let domain = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    if domain.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: "ISSUER_URL".to_string(),
            reason: "has no host component".to_string(),
        });
    }

    Ok(domain)
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("'{raw}' is not a valid number"),
        }),
    }
}
