//! API-key authentication

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use classline_common::types::TenantId;
use classline_core::{BroadcastOrchestrator, DeliveryQueue, Throttle};
use classline_storage::repository::TenantRepository;
use classline_storage::DatabasePool;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabasePool,
    pub queue: Arc<DeliveryQueue>,
    pub orchestrator: Arc<BroadcastOrchestrator>,
    pub throttle: Arc<Throttle>,
}

/// Authenticated context extracted from an API key
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The tenant this API key belongs to
    pub tenant_id: TenantId,
}

/// Extract the API key from the request headers
pub fn extract_api_key(req: &Request) -> Option<&str> {
    if let Some(auth) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token);
            }
        }
    }

    if let Some(key) = req.headers().get("x-api-key") {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str);
        }
    }

    None
}

/// The lookup prefix of an API key (first 8 characters)
fn extract_key_prefix(api_key: &str) -> Option<&str> {
    if api_key.len() >= 8 {
        Some(&api_key[..8])
    } else {
        None
    }
}

/// Hash an API key for comparison
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

async fn resolve_tenant(db_pool: &DatabasePool, api_key: &str) -> Result<TenantId, StatusCode> {
    let prefix = extract_key_prefix(api_key).ok_or_else(|| {
        warn!("API key too short");
        StatusCode::UNAUTHORIZED
    })?;

    let repo = TenantRepository::new(db_pool.pool().clone());

    let candidates = repo.find_by_key_prefix(prefix).await.map_err(|e| {
        error!("Database error while looking up API key: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let hash = hash_api_key(api_key);
    candidates
        .into_iter()
        .find(|t| t.api_key_hash == hash)
        .map(|t| t.id)
        .ok_or(StatusCode::UNAUTHORIZED)
}

/// Middleware that authenticates every API request and attaches the
/// tenant-scoped [`AuthContext`]
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let api_key = extract_api_key(&req)
        .map(str::to_owned)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let tenant_id = resolve_tenant(&state.db_pool, &api_key).await?;

    req.extensions_mut().insert(AuthContext { tenant_id });

    Ok(next.run(req).await)
}

/// Check the authenticated context against the tenant in the request path
pub fn require_tenant_access(auth: &AuthContext, tenant_id: TenantId) -> Result<(), StatusCode> {
    if auth.tenant_id == tenant_id {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_prefix() {
        assert_eq!(extract_key_prefix("abcdefgh-rest"), Some("abcdefgh"));
        assert_eq!(extract_key_prefix("short"), None);
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_api_key("cl_test_key");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_api_key("cl_test_key"));
        assert_ne!(hash, hash_api_key("cl_other_key"));
    }

    #[test]
    fn test_tenant_access() {
        let tenant = uuid::Uuid::new_v4();
        let auth = AuthContext { tenant_id: tenant };

        assert!(require_tenant_access(&auth, tenant).is_ok());
        assert_eq!(
            require_tenant_access(&auth, uuid::Uuid::new_v4()),
            Err(StatusCode::FORBIDDEN)
        );
    }
}
