//! Principal resolution. Password hashing and token minting live outside
//! this repository; the server only consumes a [`PrincipalResolver`]. The
//! default implementation looks bearer tokens up in the store.

use aidesk_core::Principal;
use aidesk_core::store::Store;
use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::error::ApiError;

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Bearer token → caller identity, or `None` for an unknown token.
    async fn resolve(&self, token: &str) -> Result<Option<Principal>, ApiError>;
}

/// Store-backed resolver: `api_tokens` join `memberships`.
pub struct TokenResolver {
    store: Store,
}

impl TokenResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PrincipalResolver for TokenResolver {
    async fn resolve(&self, token: &str) -> Result<Option<Principal>, ApiError> {
        let resolved = self.store.resolve_token(token).await?;
        Ok(resolved.map(|(user_id, team_id, role)| Principal {
            user_id,
            team_id,
            role,
        }))
    }
}

/// Pulls the bearer token out of the headers and resolves it; 401 on
/// anything missing or unknown.
pub async fn authenticate(
    resolver: &dyn PrincipalResolver,
    headers: &HeaderMap,
) -> Result<Principal, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    resolver
        .resolve(token)
        .await?
        .ok_or(ApiError::Unauthorized)
}
