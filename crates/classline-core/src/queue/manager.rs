//! Delivery queue manager

use chrono::{DateTime, Utc};
use classline_common::types::TenantId;
use classline_storage::db::DatabasePool;
use classline_storage::models::{CreateDeliveryEntry, DeliveryEntry, DeliveryStatus};
use classline_storage::repository::DeliveryEntryRepository;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::ChannelError;
use crate::throttle::Throttle;

/// Delivery queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Delivery entry not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Entry already leased by another dispatcher")]
    AlreadyLeased,

    #[error("Entry is not in a state that allows this operation")]
    InvalidState,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// What to do with a leased entry after a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to Pending for another attempt
    Retry,
    /// Terminal Failed, surfaced to the tenant
    GiveUp,
}

/// Decide the fate of a failed send.
///
/// Permanent channel errors fail fast regardless of remaining attempts;
/// transient errors retry until the attempt budget is spent.
pub fn failure_disposition(
    error: &ChannelError,
    attempts: i32,
    max_attempts: i32,
) -> FailureDisposition {
    if error.is_permanent() || attempts >= max_attempts {
        FailureDisposition::GiveUp
    } else {
        FailureDisposition::Retry
    }
}

fn validate_enqueue(input: &CreateDeliveryEntry) -> Result<(), QueueError> {
    if input.chat_id.trim().is_empty() {
        return Err(QueueError::Validation("chat_id must not be empty".into()));
    }
    if input.text.trim().is_empty() {
        return Err(QueueError::Validation(
            "message text must not be empty".into(),
        ));
    }
    if let Some(max) = input.max_attempts {
        if max < 1 {
            return Err(QueueError::Validation(
                "max_attempts must be at least 1".into(),
            ));
        }
    }
    Ok(())
}

/// Delivery queue - the single source of truth for scheduling decisions.
///
/// All mutation goes through these operations; each status transition is a
/// single conditional update in the repository.
pub struct DeliveryQueue {
    entries: DeliveryEntryRepository,
    throttle: Arc<Throttle>,
}

impl DeliveryQueue {
    /// Create a new delivery queue
    pub fn new(db_pool: &DatabasePool, throttle: Arc<Throttle>) -> Self {
        Self {
            entries: DeliveryEntryRepository::new(db_pool.pool().clone()),
            throttle,
        }
    }

    /// Get the underlying repository
    pub fn repository(&self) -> &DeliveryEntryRepository {
        &self.entries
    }

    /// Accept a new entry.
    ///
    /// When the caller gives no `scheduled_for` and the tenant's policy is
    /// active, a slot is computed so the entry respects pacing from the
    /// moment it is stored; otherwise it is Pending and eligible immediately.
    pub async fn enqueue(
        &self,
        mut input: CreateDeliveryEntry,
    ) -> Result<DeliveryEntry, QueueError> {
        validate_enqueue(&input)?;

        if input.scheduled_for.is_none() {
            input.scheduled_for = self
                .throttle
                .schedule_hint(input.tenant_id, Utc::now())
                .await?;
        }

        let entry = self.entries.create(input).await?;

        info!(
            entry_id = %entry.id,
            tenant_id = %entry.tenant_id,
            kind = %entry.kind,
            status = %entry.status,
            "Enqueued delivery entry"
        );

        Ok(entry)
    }

    /// Fan out a batch of entries in one transaction
    pub async fn enqueue_batch(
        &self,
        entries: Vec<CreateDeliveryEntry>,
    ) -> Result<u64, QueueError> {
        for input in &entries {
            validate_enqueue(input)?;
        }

        Ok(self.entries.create_batch(entries).await?)
    }

    /// Fetch an entry scoped to its tenant
    pub async fn get(&self, tenant_id: TenantId, id: Uuid) -> Result<DeliveryEntry, QueueError> {
        self.entries
            .get_by_tenant(tenant_id, id)
            .await?
            .ok_or(QueueError::NotFound)
    }

    /// List entries for a tenant
    pub async fn list(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveryEntry>, QueueError> {
        Ok(self
            .entries
            .list_by_tenant(tenant_id, status, limit, offset)
            .await?)
    }

    /// Count entries for a tenant
    pub async fn count(
        &self,
        tenant_id: TenantId,
        status: Option<DeliveryStatus>,
    ) -> Result<i64, QueueError> {
        Ok(self.entries.count_by_tenant(tenant_id, status).await?)
    }

    /// Cancel a not-yet-dispatched entry.
    ///
    /// Anything already leased or terminal reports InvalidState; cancellation
    /// is never retroactive.
    pub async fn cancel(&self, tenant_id: TenantId, id: Uuid) -> Result<DeliveryEntry, QueueError> {
        if let Some(entry) = self.entries.cancel(tenant_id, id).await? {
            info!(entry_id = %entry.id, "Cancelled delivery entry");
            return Ok(entry);
        }

        match self.entries.get_by_tenant(tenant_id, id).await? {
            Some(_) => Err(QueueError::InvalidState),
            None => Err(QueueError::NotFound),
        }
    }

    /// Re-drive a permanently failed entry
    pub async fn requeue(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<DeliveryEntry, QueueError> {
        if let Some(entry) = self.entries.requeue(tenant_id, id).await? {
            info!(entry_id = %entry.id, "Re-queued failed delivery entry");
            return Ok(entry);
        }

        match self.entries.get_by_tenant(tenant_id, id).await? {
            Some(_) => Err(QueueError::InvalidState),
            None => Err(QueueError::NotFound),
        }
    }

    /// Next eligible batch for a tenant, in dispatch order
    pub async fn next_eligible(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> Result<Vec<DeliveryEntry>, QueueError> {
        Ok(self.entries.next_eligible(tenant_id, limit).await?)
    }

    /// Tenants that currently have dispatchable work
    pub async fn tenants_with_work(&self) -> Result<Vec<TenantId>, QueueError> {
        Ok(self.entries.tenants_with_eligible().await?)
    }

    /// Lease an entry for dispatch; AlreadyLeased when another dispatcher won
    pub async fn lease(&self, id: Uuid) -> Result<(), QueueError> {
        if self.entries.lease(id).await? {
            Ok(())
        } else {
            Err(QueueError::AlreadyLeased)
        }
    }

    /// Record a successful send
    pub async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
    ) -> Result<DeliveryEntry, QueueError> {
        self.entries
            .mark_sent(id, provider_message_id)
            .await?
            .ok_or(QueueError::InvalidState)
    }

    /// Record a failed send on a leased entry.
    ///
    /// The returned entry carries the final status: Pending for a retry,
    /// Failed once the attempt budget is spent or the error is permanent.
    pub async fn mark_failed(
        &self,
        entry: &DeliveryEntry,
        error: &ChannelError,
    ) -> Result<DeliveryEntry, QueueError> {
        let message = error.to_string();

        let updated = match failure_disposition(error, entry.attempts, entry.max_attempts) {
            FailureDisposition::Retry => {
                debug!(
                    entry_id = %entry.id,
                    attempts = entry.attempts,
                    max_attempts = entry.max_attempts,
                    "Transient failure, re-queueing"
                );
                self.entries.mark_failed_retry(entry.id, &message).await?
            }
            FailureDisposition::GiveUp => {
                self.entries.mark_failed_terminal(entry.id, &message).await?
            }
        };

        updated.ok_or(QueueError::InvalidState)
    }

    /// Return abandoned Processing leases to Pending
    pub async fn release_stale(&self, leased_before: DateTime<Utc>) -> Result<u64, QueueError> {
        Ok(self.entries.release_stale(leased_before).await?)
    }

    /// Fail abandoned leases whose attempt budget is already spent
    pub async fn fail_exhausted_stale(
        &self,
        leased_before: DateTime<Utc>,
    ) -> Result<Vec<DeliveryEntry>, QueueError> {
        Ok(self.entries.fail_exhausted_stale(leased_before).await?)
    }

    /// Earliest future scheduled instant, if any; lets the dispatcher wake
    /// exactly when the next entry becomes eligible
    pub async fn next_wake_hint(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        Ok(self.entries.earliest_upcoming().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classline_common::types::DeliveryKind;
    use pretty_assertions::assert_eq;

    fn input() -> CreateDeliveryEntry {
        CreateDeliveryEntry {
            tenant_id: Uuid::new_v4(),
            campaign_id: None,
            kind: DeliveryKind::ClassSummary,
            chat_id: "chat-1".to_string(),
            text: "Today we covered fractions.".to_string(),
            metadata: None,
            scheduled_for: None,
            priority: None,
            max_attempts: None,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_input() {
        assert!(validate_enqueue(&input()).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_chat_id() {
        let mut bad = input();
        bad.chat_id = "   ".to_string();
        assert!(matches!(
            validate_enqueue(&bad),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_text() {
        let mut bad = input();
        bad.text = String::new();
        assert!(matches!(
            validate_enqueue(&bad),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut bad = input();
        bad.max_attempts = Some(0);
        assert!(matches!(
            validate_enqueue(&bad),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn test_transient_failure_retries_under_budget() {
        let err = ChannelError::Transient("timeout".into());
        assert_eq!(failure_disposition(&err, 1, 3), FailureDisposition::Retry);
        assert_eq!(failure_disposition(&err, 2, 3), FailureDisposition::Retry);
    }

    #[test]
    fn test_transient_failure_gives_up_at_budget() {
        let err = ChannelError::Transient("timeout".into());
        assert_eq!(failure_disposition(&err, 3, 3), FailureDisposition::GiveUp);
    }

    #[test]
    fn test_permanent_failure_never_retries() {
        // First attempt, budget untouched: still terminal.
        let err = ChannelError::Permanent("unknown chat".into());
        assert_eq!(failure_disposition(&err, 1, 3), FailureDisposition::GiveUp);
    }
}
