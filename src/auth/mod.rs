//! Caller identity at the edge of the export engine.
//!
//! Session and token validation live in an external service. This module only
//! carries what the engine needs from it:
//! - the opaque caller credential (bearer token, or anonymous)
//! - an [`AccessPolicy`] deciding whether that credential may read a dataset
//! - credential-bound job ids

mod job_token;

pub use job_token::JobIdIssuer;

use crate::Error;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

/// Opaque caller credential taken from the `Authorization: Bearer` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential(pub Option<String>);

impl Credential {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Text bound into job ids; empty for anonymous callers.
    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or("")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Credential
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Credential::anonymous());
        };
        let value = header
            .to_str()
            .map_err(|_| Error::Unauthorized("malformed authorization header".to_string()))?;
        match value.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Ok(Credential::bearer(token.trim())),
            _ => Err(Error::Unauthorized(
                "expected a bearer token".to_string(),
            )),
        }
    }
}

/// Read permission check delegated to the authentication service.
pub trait AccessPolicy: Send + Sync {
    fn can_read(&self, credential: &Credential, dataset: &str) -> bool;
}

/// Grants every caller read access to every dataset.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

impl AccessPolicy for OpenAccess {
    fn can_read(&self, _credential: &Credential, _dataset: &str) -> bool {
        true
    }
}

pub fn ensure_readable(
    policy: &dyn AccessPolicy,
    credential: &Credential,
    dataset: &str,
) -> Result<(), Error> {
    if policy.can_read(credential, dataset) {
        Ok(())
    } else {
        tracing::debug!("read access to {} denied", dataset);
        Err(Error::Unauthorized(format!("no read access to {}", dataset)))
    }
}
