mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::JwtVerifier;

use async_trait::async_trait;

use crate::error::AppError;

/// Verified identity extracted from an authentication token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
}

/// Token validation collaborator.
///
/// The production implementation is [`JwtVerifier`]; tests substitute scripted
/// verifiers.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AppError>;
}
