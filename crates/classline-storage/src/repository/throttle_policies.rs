//! Throttle policy repository

use classline_common::types::TenantId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ThrottlePolicy, UpdateThrottlePolicy};

/// Throttle policy repository
#[derive(Clone)]
pub struct ThrottlePolicyRepository {
    pool: PgPool,
}

impl ThrottlePolicyRepository {
    /// Create a new throttle policy repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the policy for a tenant, if one was ever written
    pub async fn get(&self, tenant_id: TenantId) -> Result<Option<ThrottlePolicy>, sqlx::Error> {
        sqlx::query_as::<_, ThrottlePolicy>(
            "SELECT * FROM throttle_policies WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get the policy for a tenant, falling back to defaults.
    ///
    /// Policies are created lazily: a tenant that never touched its settings
    /// gets the default policy without a row being written.
    pub async fn get_or_default(&self, tenant_id: TenantId) -> Result<ThrottlePolicy, sqlx::Error> {
        let policy = self.get(tenant_id).await?;

        Ok(policy.unwrap_or_else(|| ThrottlePolicy {
            tenant_id,
            ..ThrottlePolicy::default()
        }))
    }

    /// Insert or update the policy for a tenant.
    ///
    /// Unset fields keep their current (or default) value.
    pub async fn upsert(&self, input: UpdateThrottlePolicy) -> Result<ThrottlePolicy, sqlx::Error> {
        let current = self.get_or_default(input.tenant_id).await?;

        let min_delay_secs = input.min_delay_secs.unwrap_or(current.min_delay_secs);
        let max_delay_secs = input.max_delay_secs.unwrap_or(current.max_delay_secs);
        let max_per_hour = input.max_per_hour.unwrap_or(current.max_per_hour);
        let max_per_day = input.max_per_day.unwrap_or(current.max_per_day);
        let quiet_start_hour = input.quiet_start_hour.unwrap_or(current.quiet_start_hour);
        let quiet_end_hour = input.quiet_end_hour.unwrap_or(current.quiet_end_hour);
        let tz_offset_minutes = input.tz_offset_minutes.unwrap_or(current.tz_offset_minutes);
        let enabled = input.enabled.unwrap_or(current.enabled);

        sqlx::query_as::<_, ThrottlePolicy>(
            r#"
            INSERT INTO throttle_policies (
                id, tenant_id, min_delay_secs, max_delay_secs, max_per_hour,
                max_per_day, quiet_start_hour, quiet_end_hour, tz_offset_minutes, enabled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tenant_id)
            DO UPDATE SET
                min_delay_secs = EXCLUDED.min_delay_secs,
                max_delay_secs = EXCLUDED.max_delay_secs,
                max_per_hour = EXCLUDED.max_per_hour,
                max_per_day = EXCLUDED.max_per_day,
                quiet_start_hour = EXCLUDED.quiet_start_hour,
                quiet_end_hour = EXCLUDED.quiet_end_hour,
                tz_offset_minutes = EXCLUDED.tz_offset_minutes,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(min_delay_secs)
        .bind(max_delay_secs)
        .bind(max_per_hour)
        .bind(max_per_day)
        .bind(quiet_start_hour)
        .bind(quiet_end_hour)
        .bind(tz_offset_minutes)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await
    }
}
