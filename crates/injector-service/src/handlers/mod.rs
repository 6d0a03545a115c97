pub mod discovery_handler;
pub mod mutate_handler;
pub mod refresh_handler;

use crate::config::Config;
use crate::models::{Jwks, OpenIdConfiguration};
use crate::services::mutation::MutationController;
use crate::services::refresh::RefreshScheduler;

/// Application state shared across handlers.
///
/// The discovery document and JWKS are computed once at startup; the key
/// set is immutable for the process lifetime, so there is nothing to
/// invalidate.
pub struct AppState {
    pub config: Config,
    pub mutation: MutationController,
    pub refresh: RefreshScheduler,
    pub openid_configuration: OpenIdConfiguration,
    pub jwks: Jwks,
}
