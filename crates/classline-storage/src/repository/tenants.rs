//! Tenant repository

use classline_common::types::TenantId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateTenant, Tenant};

/// Tenant repository
#[derive(Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    /// Create a new tenant repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new tenant
    pub async fn create(&self, input: CreateTenant) -> Result<Tenant, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, name, api_key_hash, api_key_prefix)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.api_key_hash)
        .bind(&input.api_key_prefix)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a tenant by ID
    pub async fn get(&self, id: TenantId) -> Result<Option<Tenant>, sqlx::Error> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Find active tenants whose API key starts with the given prefix
    pub async fn find_by_key_prefix(&self, prefix: &str) -> Result<Vec<Tenant>, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE api_key_prefix = $1 AND active = TRUE",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
    }
}
