//! Authentication Backends
//!
//! - `null`: every request is treated as admin (development setups)
//! - `token`: static bearer tokens mapped to admin or a project

use crate::config::AuthConfig;
use crate::domain::ports::{Actor, AuthBackend, AuthBackendRef};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Principal name granting admin rights in the token table
pub const ADMIN_PRINCIPAL: &str = "admin";

// =============================================================================
// Null Backend
// =============================================================================

/// Backend authenticating every request as admin
#[derive(Debug, Default)]
pub struct NullAuthBackend;

impl AuthBackend for NullAuthBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn authenticate(&self, _token: Option<&str>) -> Result<Actor> {
        Ok(Actor::Admin)
    }
}

// =============================================================================
// Token Backend
// =============================================================================

/// Backend resolving bearer tokens from a static table
#[derive(Debug)]
pub struct TokenAuthBackend {
    tokens: BTreeMap<String, Actor>,
}

impl TokenAuthBackend {
    pub fn new(tokens: &BTreeMap<String, String>) -> Self {
        let tokens = tokens
            .iter()
            .map(|(token, principal)| {
                let actor = if principal == ADMIN_PRINCIPAL {
                    Actor::Admin
                } else {
                    Actor::project(principal.clone())
                };
                (token.clone(), actor)
            })
            .collect();

        Self { tokens }
    }
}

impl AuthBackend for TokenAuthBackend {
    fn name(&self) -> &str {
        "token"
    }

    fn authenticate(&self, token: Option<&str>) -> Result<Actor> {
        let token = token.ok_or_else(|| Error::Authorization("missing bearer token".into()))?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Authorization("unknown bearer token".into()))
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Factory for authentication backends
pub struct AuthBackendFactory;

impl AuthBackendFactory {
    /// Create the backend named in the configuration
    pub fn create(config: &AuthConfig) -> Result<AuthBackendRef> {
        match config.backend.to_lowercase().as_str() {
            "null" | "none" => Ok(Arc::new(NullAuthBackend)),
            "token" => {
                if config.tokens.is_empty() {
                    return Err(Error::Configuration(
                        "token auth backend configured without tokens".into(),
                    ));
                }
                Ok(Arc::new(TokenAuthBackend::new(&config.tokens)))
            }
            other => Err(Error::Configuration(format!(
                "unknown auth backend: {}",
                other
            ))),
        }
    }
}
