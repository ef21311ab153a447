//! Throttle gate - stateful side of the throttle policy

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use classline_common::types::TenantId;
use classline_storage::db::DatabasePool;
use classline_storage::models::ThrottlePolicy;
use classline_storage::repository::{DeliveryEntryRepository, ThrottlePolicyRepository};
use rand::thread_rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::policy;

/// Per-tenant throttle gate.
///
/// Rolling hourly/daily counters are derived from the delivery queue's sent
/// timestamps on every check; the queue stays the single source of truth and
/// nothing can drift. Policies themselves are cached and invalidated on
/// settings updates.
pub struct Throttle {
    policies: ThrottlePolicyRepository,
    entries: DeliveryEntryRepository,
    cache: Arc<RwLock<HashMap<TenantId, ThrottlePolicy>>>,
}

impl Throttle {
    /// Create a new throttle gate
    pub fn new(db_pool: &DatabasePool) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            policies: ThrottlePolicyRepository::new(pool.clone()),
            entries: DeliveryEntryRepository::new(pool),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the policy for a tenant (with caching)
    pub async fn policy_for(&self, tenant_id: TenantId) -> Result<ThrottlePolicy> {
        {
            let cache = self.cache.read().await;
            if let Some(policy) = cache.get(&tenant_id) {
                return Ok(policy.clone());
            }
        }

        let policy = self.policies.get_or_default(tenant_id).await?;

        {
            let mut cache = self.cache.write().await;
            cache.insert(tenant_id, policy.clone());
        }

        Ok(policy)
    }

    /// Whether the tenant may send right now.
    ///
    /// False inside quiet hours or once the trailing 1-hour / 24-hour send
    /// counts reach the policy caps.
    pub async fn can_send_now(&self, tenant_id: TenantId, now: DateTime<Utc>) -> Result<bool> {
        let policy = self.policy_for(tenant_id).await?;

        if !policy.enabled {
            return Ok(true);
        }

        if policy::in_quiet_hours(&policy, now) {
            debug!(%tenant_id, "Send blocked by quiet hours");
            return Ok(false);
        }

        let sent_last_hour = self
            .entries
            .sent_count_since(tenant_id, now - Duration::hours(1))
            .await?;

        let sent_last_day = if policy.max_per_day.is_some() {
            self.entries
                .sent_count_since(tenant_id, now - Duration::hours(24))
                .await?
        } else {
            0
        };

        if policy::caps_reached(&policy, sent_last_hour, sent_last_day) {
            debug!(
                %tenant_id,
                sent_last_hour,
                sent_last_day,
                "Send blocked by rolling caps"
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Compute the dispatch instant for a newly enqueued entry.
    ///
    /// Chains after the tenant's latest scheduled-but-unsent entry so queued
    /// sends never collapse onto the same instant.
    pub async fn compute_scheduled_time(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let policy = self.policy_for(tenant_id).await?;
        let tail = self.entries.latest_scheduled_for(tenant_id).await?;

        Ok(policy::next_send_slot(&policy, now, tail, &mut thread_rng()))
    }

    /// Scheduling hint for enqueue: a concrete slot when the policy is
    /// active, None when throttling is disabled and the entry may go out
    /// immediately.
    pub async fn schedule_hint(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let policy = self.policy_for(tenant_id).await?;

        if !policy.enabled {
            return Ok(None);
        }

        Ok(Some(self.compute_scheduled_time(tenant_id, now).await?))
    }

    /// Randomized inter-send spacing for the dispatch loop
    pub async fn spacing(&self, tenant_id: TenantId) -> Result<std::time::Duration> {
        let policy = self.policy_for(tenant_id).await?;
        let delay = policy::spacing_delay(&policy, &mut thread_rng());

        Ok(delay.to_std().unwrap_or_default())
    }

    /// Drop the cached policy after a settings update
    pub async fn invalidate(&self, tenant_id: TenantId) {
        let mut cache = self.cache.write().await;
        cache.remove(&tenant_id);
    }
}
