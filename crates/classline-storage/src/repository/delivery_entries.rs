//! Delivery entry repository
//!
//! Every status transition here is a single conditional UPDATE. The lease
//! transition in particular is the at-most-one-in-flight guarantee: two
//! dispatchers racing for the same entry cannot both see a row change.

use chrono::{DateTime, Utc};
use classline_common::types::{CampaignId, TenantId};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{CreateDeliveryEntry, DeliveryEntry, DeliveryStatus};

/// Delivery entry repository
#[derive(Clone)]
pub struct DeliveryEntryRepository {
    pool: PgPool,
}

impl DeliveryEntryRepository {
    /// Create a new delivery entry repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a new delivery entry.
    ///
    /// Status is derived from the presence of `scheduled_for`: a concrete
    /// instant makes the entry Scheduled, otherwise it is Pending and
    /// eligible immediately.
    pub async fn create(
        &self,
        input: CreateDeliveryEntry,
    ) -> Result<DeliveryEntry, sqlx::Error> {
        let id = Uuid::new_v4();
        let metadata = input.metadata.unwrap_or_else(|| serde_json::json!({}));
        let status = if input.scheduled_for.is_some() {
            DeliveryStatus::Scheduled
        } else {
            DeliveryStatus::Pending
        };

        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            INSERT INTO delivery_entries (
                id, tenant_id, campaign_id, kind, chat_id, text,
                metadata, status, priority, scheduled_for, max_attempts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(input.campaign_id)
        .bind(input.kind.to_string())
        .bind(&input.chat_id)
        .bind(&input.text)
        .bind(&metadata)
        .bind(status.to_string())
        .bind(input.priority.unwrap_or(0))
        .bind(input.scheduled_for)
        .bind(input.max_attempts.unwrap_or(3))
        .fetch_one(&self.pool)
        .await
    }

    /// Create multiple delivery entries in one transaction
    pub async fn create_batch(
        &self,
        entries: Vec<CreateDeliveryEntry>,
    ) -> Result<u64, sqlx::Error> {
        let mut count = 0u64;
        let mut tx = self.pool.begin().await?;

        for input in entries {
            let id = Uuid::new_v4();
            let metadata = input.metadata.unwrap_or_else(|| serde_json::json!({}));
            let status = if input.scheduled_for.is_some() {
                DeliveryStatus::Scheduled
            } else {
                DeliveryStatus::Pending
            };

            let result = sqlx::query(
                r#"
                INSERT INTO delivery_entries (
                    id, tenant_id, campaign_id, kind, chat_id, text,
                    metadata, status, priority, scheduled_for, max_attempts
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(id)
            .bind(input.tenant_id)
            .bind(input.campaign_id)
            .bind(input.kind.to_string())
            .bind(&input.chat_id)
            .bind(&input.text)
            .bind(&metadata)
            .bind(status.to_string())
            .bind(input.priority.unwrap_or(0))
            .bind(input.scheduled_for)
            .bind(input.max_attempts.unwrap_or(3))
            .execute(&mut *tx)
            .await?;

            count += result.rows_affected();
        }

        tx.commit().await?;
        Ok(count)
    }

    /// Get a delivery entry by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>("SELECT * FROM delivery_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a delivery entry by ID and tenant
    pub async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            "SELECT * FROM delivery_entries WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List delivery entries for a tenant
    pub async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveryEntry>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, DeliveryEntry>(
                r#"
                SELECT * FROM delivery_entries
                WHERE tenant_id = $1 AND status = $2
                ORDER BY created_at DESC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(tenant_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, DeliveryEntry>(
                r#"
                SELECT * FROM delivery_entries
                WHERE tenant_id = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(tenant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// List delivery entries for a campaign
    pub async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveryEntry>, sqlx::Error> {
        if let Some(status) = status {
            sqlx::query_as::<_, DeliveryEntry>(
                r#"
                SELECT * FROM delivery_entries
                WHERE campaign_id = $1 AND status = $2
                ORDER BY created_at ASC
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(campaign_id)
            .bind(status.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, DeliveryEntry>(
                r#"
                SELECT * FROM delivery_entries
                WHERE campaign_id = $1
                ORDER BY created_at ASC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(campaign_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
    }

    /// Get entries eligible for dispatch for a tenant.
    ///
    /// Eligible means Pending, or Scheduled with the scheduled instant
    /// reached. Ordering is priority first, then scheduled time, then
    /// creation time, so urgent entries jump the line while equal-priority
    /// entries stay FIFO.
    pub async fn next_eligible(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> Result<Vec<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            SELECT * FROM delivery_entries
            WHERE tenant_id = $1
              AND (status = 'pending'
                   OR (status = 'scheduled' AND scheduled_for <= NOW()))
            ORDER BY priority DESC, scheduled_for ASC NULLS FIRST, created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Tenants that currently have at least one eligible entry
    pub async fn tenants_with_eligible(&self) -> Result<Vec<TenantId>, sqlx::Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT tenant_id FROM delivery_entries
            WHERE status = 'pending'
               OR (status = 'scheduled' AND scheduled_for <= NOW())
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Atomically lease an entry for dispatch.
    ///
    /// Single conditional update: only a Pending or due Scheduled entry can
    /// move to Processing, and only one caller observes the row change.
    pub async fn lease(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_entries SET
                status = 'processing',
                leased_at = NOW(),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'scheduled')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a leased entry as sent
    pub async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            UPDATE delivery_entries SET
                status = 'sent',
                provider_message_id = $2,
                last_error = NULL,
                sent_at = NOW(),
                processed_at = NOW(),
                leased_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Return a leased entry to Pending for another attempt
    pub async fn mark_failed_retry(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            UPDATE delivery_entries SET
                status = 'pending',
                last_error = $2,
                scheduled_for = NULL,
                leased_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
    }

    /// Move a leased entry to terminal Failed
    pub async fn mark_failed_terminal(
        &self,
        id: Uuid,
        error: &str,
    ) -> Result<Option<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            UPDATE delivery_entries SET
                status = 'failed',
                last_error = $2,
                processed_at = NOW(),
                leased_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
    }

    /// Cancel an entry that has not been dispatched yet
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            UPDATE delivery_entries SET
                status = 'cancelled',
                processed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status IN ('pending', 'scheduled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Cancel all not-yet-dispatched entries of a campaign
    pub async fn cancel_by_campaign(&self, campaign_id: CampaignId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_entries SET
                status = 'cancelled',
                processed_at = NOW(),
                updated_at = NOW()
            WHERE campaign_id = $1 AND status IN ('pending', 'scheduled')
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Re-drive a permanently failed entry
    pub async fn requeue(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            UPDATE delivery_entries SET
                status = 'pending',
                attempts = 0,
                last_error = NULL,
                scheduled_for = NULL,
                processed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Return abandoned leases to Pending.
    ///
    /// A Processing entry whose lease is older than the cutoff belongs to a
    /// dispatcher that crashed mid-send; it must not stay stuck. Only
    /// entries with attempts left are released; exhausted ones go through
    /// [`Self::fail_exhausted_stale`] so `attempts` never exceeds
    /// `max_attempts`.
    pub async fn release_stale(
        &self,
        leased_before: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_entries SET
                status = 'pending',
                leased_at = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND leased_at < $1
              AND attempts < max_attempts
            "#,
        )
        .bind(leased_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fail abandoned leases that already spent their attempt budget.
    ///
    /// Returns the affected entries so the caller can roll campaign
    /// counters forward.
    pub async fn fail_exhausted_stale(
        &self,
        leased_before: DateTime<Utc>,
    ) -> Result<Vec<DeliveryEntry>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryEntry>(
            r#"
            UPDATE delivery_entries SET
                status = 'failed',
                last_error = 'lease expired after final attempt',
                processed_at = NOW(),
                leased_at = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND leased_at < $1
              AND attempts >= max_attempts
            RETURNING *
            "#,
        )
        .bind(leased_before)
        .fetch_all(&self.pool)
        .await
    }

    /// Count entries sent for a tenant since an instant.
    ///
    /// The throttle's rolling hourly/daily counters are derived from these
    /// timestamps; there is no separate counter table to drift.
    pub async fn sent_count_since(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM delivery_entries
            WHERE tenant_id = $1 AND status = 'sent' AND sent_at >= $2
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    /// Latest scheduled-but-not-yet-sent instant for a tenant, used to chain
    /// new scheduled entries after the existing queue tail
    pub async fn latest_scheduled_for(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            r#"
            SELECT MAX(scheduled_for) FROM delivery_entries
            WHERE tenant_id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Earliest future scheduled instant across all tenants, used by the
    /// dispatcher to wake when the next entry becomes eligible
    pub async fn earliest_upcoming(&self) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            r#"
            SELECT MIN(scheduled_for) FROM delivery_entries
            WHERE status = 'scheduled' AND scheduled_for > NOW()
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Count entries for a tenant
    pub async fn count_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = if let Some(status) = status {
            sqlx::query_as(
                "SELECT COUNT(*) FROM delivery_entries WHERE tenant_id = $1 AND status = $2",
            )
            .bind(tenant_id)
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM delivery_entries WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(count.0)
    }

    /// Per-status counts for a campaign's children
    pub async fn campaign_status_counts(
        &self,
        campaign_id: CampaignId,
    ) -> Result<DeliveryStatusCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'scheduled') as scheduled,
                COUNT(*) FILTER (WHERE status = 'processing') as processing,
                COUNT(*) FILTER (WHERE status = 'sent') as sent,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') as cancelled
            FROM delivery_entries
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DeliveryStatusCounts {
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            scheduled: row.get::<Option<i64>, _>("scheduled").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            cancelled: row.get::<Option<i64>, _>("cancelled").unwrap_or(0),
        })
    }
}

/// Delivery entry counts by status
#[derive(Debug, Clone, Default)]
pub struct DeliveryStatusCounts {
    pub pending: i64,
    pub scheduled: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl DeliveryStatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.scheduled + self.processing + self.sent + self.failed + self.cancelled
    }

    pub fn terminal(&self) -> i64 {
        self.sent + self.failed + self.cancelled
    }

    pub fn open(&self) -> i64 {
        self.pending + self.scheduled + self.processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_counts_arithmetic() {
        let counts = DeliveryStatusCounts {
            pending: 2,
            scheduled: 3,
            processing: 1,
            sent: 5,
            failed: 1,
            cancelled: 2,
        };

        assert_eq!(counts.total(), 14);
        assert_eq!(counts.terminal(), 8);
        assert_eq!(counts.open(), 6);
    }
}
