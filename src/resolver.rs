//! Token → verified identity resolution.
//!
//! A pure read against the external session and directory stores. Callers
//! (the decision engine) collapse every failure here into "unauthenticated";
//! the precise fault is only ever visible in audit events, so the response
//! cannot be used as an oracle for which tokens exist.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::models::{Role, SessionMeta};
use crate::store::{DirectoryStore, SessionStore};

/// Why a token failed validation. Audit detail only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFault {
    Missing,
    Unknown,
    Expired,
    Revoked,
}

impl TokenFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenFault::Missing => "no_token",
            TokenFault::Unknown => "invalid_token",
            TokenFault::Expired => "expired_session",
            TokenFault::Revoked => "revoked_session",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("invalid token ({})", .0.as_str())]
    InvalidToken(TokenFault),
    #[error("identity {0} is deactivated")]
    IdentityInactive(Uuid),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity_id: Uuid,
    pub roles: Vec<Role>,
    pub session: SessionMeta,
}

pub struct IdentityResolver {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn DirectoryStore>,
    lookup_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn DirectoryStore>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            directory,
            lookup_timeout,
        }
    }

    pub async fn resolve(&self, token: &str) -> Result<ResolvedIdentity, ResolveError> {
        if token.trim().is_empty() {
            return Err(ResolveError::InvalidToken(TokenFault::Missing));
        }

        let record = match timeout(self.lookup_timeout, self.sessions.validate(token)).await {
            Err(_) => {
                return Err(ResolveError::StoreUnavailable(
                    "session store lookup timed out".to_string(),
                ))
            }
            Ok(Err(err)) => return Err(ResolveError::StoreUnavailable(err.to_string())),
            Ok(Ok(None)) => return Err(ResolveError::InvalidToken(TokenFault::Unknown)),
            Ok(Ok(Some(record))) => record,
        };

        if record.revoked {
            return Err(ResolveError::InvalidToken(TokenFault::Revoked));
        }
        if record.is_expired(Utc::now()) {
            return Err(ResolveError::InvalidToken(TokenFault::Expired));
        }

        let identity = self
            .directory
            .identity(record.identity_id)
            .await
            .map_err(|err| ResolveError::StoreUnavailable(err.to_string()))?
            .ok_or(ResolveError::InvalidToken(TokenFault::Unknown))?;

        if !identity.active {
            return Err(ResolveError::IdentityInactive(identity.id));
        }

        let roles = self
            .directory
            .roles_for(identity.id)
            .await
            .map_err(|err| ResolveError::StoreUnavailable(err.to_string()))?;

        Ok(ResolvedIdentity {
            identity_id: identity.id,
            roles,
            session: SessionMeta {
                issued_at: record.issued_at,
                expires_at: record.expires_at,
            },
        })
    }
}
