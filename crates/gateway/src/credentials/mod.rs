//! Credential lifecycle management.

mod manager;
mod token;

pub use manager::CredentialManager;
pub use token::{OAuth2TokenClient, TokenGrant, TokenRefresher};
