//! Business logic layer.
//!
//! - `key_manager` - the fixed-size signing key set
//! - `token_issuer` - identity claim encoding over the key set
//! - `mutation` - the admission decision state machine
//! - `refresh` - the token refresh sweep

pub mod key_manager;
pub mod mutation;
pub mod refresh;
pub mod token_issuer;
