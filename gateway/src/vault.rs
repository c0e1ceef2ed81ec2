//! Environment-backed credential vault
//!
//! Secrets are references rather than ciphertext: `env:NAME` reads the
//! variable `NAME` at decrypt time and `plain:VALUE` carries the value inline.

use async_trait::async_trait;
use guarded_query_core::Secret;

use crate::collaborators::CredentialVault;
use crate::error::{GatewayError, Result};

/// Credential vault resolving `env:` and `plain:` references
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialVault;

impl EnvCredentialVault {
    /// Create a new vault
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialVault for EnvCredentialVault {
    async fn decrypt(&self, secret: &str) -> Result<Secret> {
        if let Some(name) = secret.strip_prefix("env:") {
            return std::env::var(name).map(Secret::new).map_err(|_| {
                GatewayError::Credential(format!("environment variable '{}' is not set", name))
            });
        }
        if let Some(value) = secret.strip_prefix("plain:") {
            return Ok(Secret::new(value));
        }
        Err(GatewayError::Credential(
            "unsupported secret reference; expected 'env:' or 'plain:'".to_string(),
        ))
    }
}
