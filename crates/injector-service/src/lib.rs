//! Pod Identity Injector Service Library
//!
//! This library implements a Kubernetes mutating admission webhook that
//! issues short-lived web identity tokens (RS256 JWTs) to pods, so an
//! external federated-identity boundary (AWS STS) can grant scoped
//! credentials without long-lived secrets in container images.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Cryptographic operations (RSA key generation, JWT signing)
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `models` - Data models (key pairs, claims, admission review, patches)
//! - `repositories` - Cluster Secret access layer
//! - `routes` - Router construction
//! - `services` - Business logic (key set, token issuance, mutation, refresh)

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
