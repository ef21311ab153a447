//! Delivery dispatcher.
//!
//! A single cooperative loop drives both campaign ticks and individual
//! scheduled entries, so two loops can never race to lease the same entry.
//! Across processes the lease's conditional update is the only concurrency
//! mechanism needed.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use classline_common::config::SchedulerConfig;
use classline_common::types::TenantId;
use classline_storage::models::{DeliveryEntry, DeliveryStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastOrchestrator;
use crate::channel::ChannelAdapter;
use crate::queue::{DeliveryQueue, QueueError};
use crate::throttle::Throttle;

/// Floor for the inter-tick sleep, so a hint in the past cannot turn the
/// loop into a busy spin
const MIN_TICK: std::time::Duration = std::time::Duration::from_millis(250);

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Poll interval between ticks (seconds)
    pub tick_secs: u64,
    /// Maximum entries pulled per tenant per tick
    pub batch_size: i64,
    /// Age after which a Processing lease is treated as abandoned (seconds)
    pub lease_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_secs: 5,
            batch_size: 10,
            lease_timeout_secs: 300,
        }
    }
}

impl From<&SchedulerConfig> for DispatcherConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_secs: config.tick_secs,
            batch_size: config.batch_size,
            lease_timeout_secs: config.lease_timeout_secs,
        }
    }
}

/// Sleep until the next tick: the poll interval, shortened when the next
/// scheduled entry becomes eligible sooner
fn clamp_wake(
    now: DateTime<Utc>,
    next_eligible: DateTime<Utc>,
    tick: std::time::Duration,
) -> std::time::Duration {
    if next_eligible <= now {
        return MIN_TICK;
    }

    let until = (next_eligible - now).to_std().unwrap_or(MIN_TICK);
    until.clamp(MIN_TICK, tick.max(MIN_TICK))
}

/// Delivery dispatcher
pub struct Dispatcher {
    queue: Arc<DeliveryQueue>,
    throttle: Arc<Throttle>,
    orchestrator: Arc<BroadcastOrchestrator>,
    adapter: Arc<dyn ChannelAdapter>,
    config: DispatcherConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        queue: Arc<DeliveryQueue>,
        throttle: Arc<Throttle>,
        orchestrator: Arc<BroadcastOrchestrator>,
        adapter: Arc<dyn ChannelAdapter>,
        config: DispatcherConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            throttle,
            orchestrator,
            adapter,
            config,
            shutdown,
        }
    }

    /// Run the dispatch loop until shutdown.
    ///
    /// On shutdown the current send is drained, no new send starts, and
    /// remaining entries stay Pending/Scheduled for the next process start.
    pub async fn run(&self) {
        info!(
            tick_secs = self.config.tick_secs,
            batch_size = self.config.batch_size,
            lease_timeout_secs = self.config.lease_timeout_secs,
            "Dispatcher started"
        );

        loop {
            let delay = self.next_tick_delay().await;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = self.tick().await {
                error!("Dispatch tick failed: {:#}", e);
            }

            if self.shutdown.is_cancelled() {
                break;
            }
        }

        info!("Dispatcher stopped");
    }

    async fn next_tick_delay(&self) -> std::time::Duration {
        let tick = std::time::Duration::from_secs(self.config.tick_secs);

        match self.queue.next_wake_hint().await {
            Ok(Some(next)) => clamp_wake(Utc::now(), next, tick),
            Ok(None) => tick,
            Err(e) => {
                warn!("Failed to compute wake hint: {}", e);
                tick
            }
        }
    }

    /// One dispatch tick: recover stale leases, start due campaigns, then
    /// work through each tenant's eligible batch
    async fn tick(&self) -> Result<()> {
        let cutoff = Utc::now() - Duration::seconds(self.config.lease_timeout_secs as i64);

        let exhausted = self.queue.fail_exhausted_stale(cutoff).await?;
        for entry in &exhausted {
            warn!(entry_id = %entry.id, "Stale lease had no attempts left, entry failed");
            if let Some(campaign_id) = entry.campaign_id {
                self.orchestrator.record_failed(campaign_id).await?;
            }
        }

        let released = self.queue.release_stale(cutoff).await?;
        if released > 0 {
            warn!(released, "Released stale delivery leases back to pending");
        }

        self.orchestrator.start_due().await?;

        for tenant_id in self.queue.tenants_with_work().await? {
            if self.shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.dispatch_tenant(tenant_id).await {
                error!(%tenant_id, "Tenant dispatch failed: {:#}", e);
            }
        }

        Ok(())
    }

    /// Dispatch one tenant's eligible batch with enforced spacing.
    ///
    /// The throttle gate is re-checked before every send so a cap crossed
    /// mid-batch stops the batch, not just the next tick.
    async fn dispatch_tenant(&self, tenant_id: TenantId) -> Result<()> {
        if !self.throttle.can_send_now(tenant_id, Utc::now()).await? {
            debug!(%tenant_id, "Tenant throttled this tick");
            return Ok(());
        }

        let batch = self
            .queue
            .next_eligible(tenant_id, self.config.batch_size)
            .await?;

        for (i, entry) in batch.into_iter().enumerate() {
            if i > 0 {
                let spacing = self.throttle.spacing(tenant_id).await?;
                debug!(%tenant_id, spacing_ms = spacing.as_millis() as u64, "Spacing before next send");

                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(spacing) => {}
                }

                if !self.throttle.can_send_now(tenant_id, Utc::now()).await? {
                    debug!(%tenant_id, "Tenant throttled mid-batch");
                    return Ok(());
                }
            }

            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            self.dispatch_entry(entry).await?;
        }

        Ok(())
    }

    /// Lease and send a single entry.
    ///
    /// Channel failures are recorded on the entry and never abort the loop;
    /// only storage errors propagate.
    async fn dispatch_entry(&self, entry: DeliveryEntry) -> Result<()> {
        match self.queue.lease(entry.id).await {
            Ok(()) => {}
            Err(QueueError::AlreadyLeased) => {
                debug!(entry_id = %entry.id, "Entry already leased, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        // The lease consumed an attempt; mirror it for the retry decision.
        let leased = DeliveryEntry {
            attempts: entry.attempts + 1,
            ..entry
        };

        match self.adapter.send(&leased.chat_id, &leased.text).await {
            Ok(provider_message_id) => {
                self.queue.mark_sent(leased.id, &provider_message_id).await?;

                info!(
                    entry_id = %leased.id,
                    chat_id = %leased.chat_id,
                    provider_message_id = %provider_message_id,
                    "Delivery sent"
                );

                if let Some(campaign_id) = leased.campaign_id {
                    self.orchestrator.record_sent(campaign_id).await?;
                }
            }
            Err(channel_error) => {
                warn!(
                    entry_id = %leased.id,
                    attempts = leased.attempts,
                    max_attempts = leased.max_attempts,
                    "Delivery failed: {}",
                    channel_error
                );

                let updated = self.queue.mark_failed(&leased, &channel_error).await?;

                if updated.status_enum() == Some(DeliveryStatus::Failed) {
                    if let Some(campaign_id) = updated.campaign_id {
                        self.orchestrator.record_failed(campaign_id).await?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_clamp_wake_uses_tick_when_next_is_far() {
        let now = Utc::now();
        let tick = std::time::Duration::from_secs(5);

        let delay = clamp_wake(now, now + Duration::seconds(60), tick);
        assert_eq!(delay, tick);
    }

    #[test]
    fn test_clamp_wake_shortens_for_imminent_entry() {
        let now = Utc::now();
        let tick = std::time::Duration::from_secs(5);

        let delay = clamp_wake(now, now + Duration::seconds(2), tick);
        assert_eq!(delay, std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_clamp_wake_floors_past_hints() {
        let now = Utc::now();
        let tick = std::time::Duration::from_secs(5);

        let delay = clamp_wake(now, now - Duration::seconds(10), tick);
        assert_eq!(delay, MIN_TICK);
    }

    #[test]
    fn test_dispatcher_config_from_scheduler_config() {
        let scheduler = SchedulerConfig {
            tick_secs: 2,
            batch_size: 4,
            lease_timeout_secs: 60,
        };

        let config = DispatcherConfig::from(&scheduler);
        assert_eq!(config.tick_secs, 2);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.lease_timeout_secs, 60);
    }
}
