//! Broadcast orchestrator - expands one campaign into many delivery entries

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use classline_common::types::{CampaignId, DeliveryKind, TenantId};
use classline_storage::db::DatabasePool;
use classline_storage::models::{
    Campaign, CampaignStatus, CreateCampaign, CreateDeliveryEntry, MessageVariant, ThrottlePolicy,
};
use classline_storage::repository::{CampaignRepository, DeliveryEntryRepository};
use rand::thread_rng;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::throttle::{policy, Throttle};

/// Campaign errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Campaign target resolved to no recipients")]
    NoRecipients,

    #[error("Campaign is not in a startable state")]
    NotStartable,

    #[error("Campaign is not in a cancellable state")]
    NotCancellable,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// One resolved broadcast recipient
#[derive(Debug, Clone)]
pub struct RecipientRef {
    pub chat_id: String,
    pub display_name: Option<String>,
}

/// Recipient directory collaborator.
///
/// Resolves a campaign's target selector into concrete chat ids; backed by
/// the chat gateway in production.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn list_recipients(
        &self,
        tenant_id: TenantId,
        selector: &classline_storage::models::TargetSelector,
    ) -> anyhow::Result<Vec<RecipientRef>>;
}

/// Campaign statistics derived from child entries
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub status: String,
    pub total_recipients: i32,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub open: i64,
    pub progress_percentage: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Build the fan-out entries for a campaign.
///
/// Variants rotate round-robin over recipients so a broadcast never sends
/// identical text to every chat. With an active policy, each entry's slot is
/// chained through the randomized spacing; without one the entries are
/// immediately eligible and pacing falls to the dispatcher alone.
fn build_fanout_entries<R: Rng + ?Sized>(
    campaign: &Campaign,
    variants: &[MessageVariant],
    recipients: &[RecipientRef],
    throttle_policy: Option<&ThrottlePolicy>,
    start: DateTime<Utc>,
    rng: &mut R,
) -> Vec<CreateDeliveryEntry> {
    let mut slot: Option<DateTime<Utc>> = None;

    recipients
        .iter()
        .enumerate()
        .map(|(i, recipient)| {
            let variant = &variants[i % variants.len()];

            let scheduled_for = throttle_policy.map(|p| {
                let next = policy::next_send_slot(p, start, slot, rng);
                slot = Some(next);
                next
            });

            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "campaign_name".to_string(),
                serde_json::json!(campaign.name),
            );
            if let Some(ref name) = recipient.display_name {
                metadata.insert("recipient_name".to_string(), serde_json::json!(name));
            }
            if let Some(ref media) = variant.media_ref {
                metadata.insert("media_ref".to_string(), serde_json::json!(media));
            }

            CreateDeliveryEntry {
                tenant_id: campaign.tenant_id,
                campaign_id: Some(campaign.id),
                kind: DeliveryKind::BroadcastItem,
                chat_id: recipient.chat_id.clone(),
                text: variant.text.clone(),
                metadata: Some(serde_json::Value::Object(metadata)),
                scheduled_for,
                priority: None,
                max_attempts: None,
            }
        })
        .collect()
}

fn validate_campaign(input: &CreateCampaign) -> Result<(), CampaignError> {
    if input.name.trim().is_empty() {
        return Err(CampaignError::Validation(
            "campaign name must not be empty".into(),
        ));
    }
    if input.variants.is_empty() {
        return Err(CampaignError::Validation(
            "campaign needs at least one message variant".into(),
        ));
    }
    if input.variants.iter().any(|v| v.text.trim().is_empty()) {
        return Err(CampaignError::Validation(
            "message variants must not be empty".into(),
        ));
    }
    Ok(())
}

/// Estimated completion instant from the remaining entries and hourly cap
fn estimate_completion(open: i64, max_per_hour: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if open <= 0 || max_per_hour <= 0 {
        return None;
    }

    let hours = (open as f64 / max_per_hour as f64).ceil() as i64;
    Some(now + Duration::hours(hours))
}

/// Broadcast orchestrator.
///
/// Sits above the delivery queue: it only produces entries and reads
/// aggregate counts. Dispatch itself stays with the scheduler loop.
pub struct BroadcastOrchestrator {
    campaigns: CampaignRepository,
    entries: DeliveryEntryRepository,
    throttle: Arc<Throttle>,
    directory: Arc<dyn Directory>,
}

impl BroadcastOrchestrator {
    /// Create a new broadcast orchestrator
    pub fn new(
        db_pool: &DatabasePool,
        throttle: Arc<Throttle>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            campaigns: CampaignRepository::new(pool.clone()),
            entries: DeliveryEntryRepository::new(pool),
            throttle,
            directory,
        }
    }

    /// Create a campaign definition
    pub async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign, CampaignError> {
        validate_campaign(&input)?;

        let campaign = self.campaigns.create(input).await?;

        info!(
            campaign_id = %campaign.id,
            tenant_id = %campaign.tenant_id,
            status = %campaign.status,
            "Created campaign"
        );

        Ok(campaign)
    }

    /// Get a campaign scoped to its tenant
    pub async fn get_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get_by_tenant(tenant_id, id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// List campaigns for a tenant
    pub async fn list_campaigns(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self
            .campaigns
            .list_by_tenant(tenant_id, status, limit, offset)
            .await?)
    }

    /// Count campaigns for a tenant
    pub async fn count_campaigns(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
    ) -> Result<i64, CampaignError> {
        Ok(self.campaigns.count_by_tenant(tenant_id, status).await?)
    }

    /// Start a campaign: resolve the target, fan out one entry per
    /// recipient, and move the campaign to InProgress.
    ///
    /// An empty recipient list fails the campaign before it ever reaches
    /// InProgress.
    pub async fn start_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;

        let status = campaign
            .status_enum()
            .ok_or_else(|| anyhow::anyhow!("unknown campaign status: {}", campaign.status))?;
        if !status.is_startable() {
            return Err(CampaignError::NotStartable);
        }

        let selector = campaign
            .target_selector()
            .ok_or_else(|| anyhow::anyhow!("campaign target is malformed"))?;

        let recipients = self
            .directory
            .list_recipients(tenant_id, &selector)
            .await
            .map_err(CampaignError::Internal)?;

        if recipients.is_empty() {
            warn!(campaign_id = %id, "Campaign target resolved to no recipients");
            self.campaigns
                .mark_failed(id, "target resolved to no recipients")
                .await?;
            return Err(CampaignError::NoRecipients);
        }

        let variants = campaign.variants_vec();
        if variants.is_empty() {
            self.campaigns
                .mark_failed(id, "campaign has no message variants")
                .await?;
            return Err(CampaignError::Validation(
                "campaign has no message variants".into(),
            ));
        }

        let throttle_policy = self.throttle.policy_for(tenant_id).await?;
        let active_policy = throttle_policy.enabled.then_some(&throttle_policy);

        let fanout = build_fanout_entries(
            &campaign,
            &variants,
            &recipients,
            active_policy,
            Utc::now(),
            &mut thread_rng(),
        );

        let created = self.entries.create_batch(fanout).await?;
        self.campaigns
            .set_total_recipients(id, recipients.len() as i32)
            .await?;

        let updated = self
            .campaigns
            .mark_started(id)
            .await?
            .ok_or(CampaignError::NotStartable)?;

        info!(
            campaign_id = %id,
            recipients = recipients.len(),
            entries = created,
            "Campaign started"
        );

        Ok(updated)
    }

    /// Cancel a campaign and its not-yet-dispatched children.
    ///
    /// Already sent or failed children stay untouched; cancellation is not
    /// retroactive.
    pub async fn cancel_campaign(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;

        let status = campaign
            .status_enum()
            .ok_or_else(|| anyhow::anyhow!("unknown campaign status: {}", campaign.status))?;
        if !status.is_cancellable() {
            return Err(CampaignError::NotCancellable);
        }

        let cancelled = self.entries.cancel_by_campaign(id).await?;

        let updated = self
            .campaigns
            .mark_cancelled(id)
            .await?
            .ok_or(CampaignError::NotCancellable)?;

        info!(
            campaign_id = %id,
            cancelled_entries = cancelled,
            "Campaign cancelled"
        );

        Ok(updated)
    }

    /// Record a child entry's successful send and complete the campaign if
    /// every child has reached a terminal state
    pub async fn record_sent(&self, campaign_id: CampaignId) -> Result<(), CampaignError> {
        self.campaigns.record_sent(campaign_id).await?;
        self.finish_if_done(campaign_id).await
    }

    /// Record a child entry's terminal failure
    pub async fn record_failed(&self, campaign_id: CampaignId) -> Result<(), CampaignError> {
        self.campaigns.record_failed(campaign_id).await?;
        self.finish_if_done(campaign_id).await
    }

    async fn finish_if_done(&self, campaign_id: CampaignId) -> Result<(), CampaignError> {
        if self.campaigns.complete_if_done(campaign_id).await? {
            info!(%campaign_id, "Campaign completed");
        }
        Ok(())
    }

    /// Start scheduled campaigns whose start instant has passed
    pub async fn start_due(&self) -> Result<(), CampaignError> {
        let due = self.campaigns.get_scheduled_ready().await?;

        for campaign in due {
            info!(
                campaign_id = %campaign.id,
                scheduled_at = ?campaign.scheduled_at,
                "Starting scheduled campaign"
            );

            match self.start_campaign(campaign.tenant_id, campaign.id).await {
                Ok(_) => {}
                Err(CampaignError::NoRecipients) => {
                    // Already marked failed; nothing left to do.
                }
                Err(e) => {
                    error!(campaign_id = %campaign.id, "Failed to start scheduled campaign: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Derived statistics for a campaign
    pub async fn stats(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<CampaignStats, CampaignError> {
        let campaign = self.get_campaign(tenant_id, id).await?;
        let counts = self.entries.campaign_status_counts(id).await?;
        let throttle_policy = self.throttle.policy_for(tenant_id).await?;

        let estimated_completion = if campaign.status == CampaignStatus::InProgress.to_string() {
            estimate_completion(counts.open(), throttle_policy.max_per_hour, Utc::now())
        } else {
            None
        };

        Ok(CampaignStats {
            campaign_id: id,
            status: campaign.status.clone(),
            total_recipients: campaign.total_recipients,
            sent: counts.sent,
            failed: counts.failed,
            cancelled: counts.cancelled,
            open: counts.open(),
            progress_percentage: campaign.progress_percentage(),
            estimated_completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn campaign() -> Campaign {
        Campaign {
            id: uuid::Uuid::new_v4(),
            tenant_id: uuid::Uuid::new_v4(),
            name: "spring term update".to_string(),
            variants: serde_json::json!([]),
            target: serde_json::json!({"type": "all_groups"}),
            status: "pending".to_string(),
            total_recipients: 0,
            sent_count: 0,
            failed_count: 0,
            scheduled_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn variants(n: usize) -> Vec<MessageVariant> {
        (0..n)
            .map(|i| MessageVariant {
                text: format!("variant {}", i),
                media_ref: None,
            })
            .collect()
    }

    fn recipients(n: usize) -> Vec<RecipientRef> {
        (0..n)
            .map(|i| RecipientRef {
                chat_id: format!("chat-{}", i),
                display_name: Some(format!("Family {}", i)),
            })
            .collect()
    }

    #[test]
    fn test_variants_rotate_round_robin() {
        let campaign = campaign();
        let variants = variants(2);
        let recipients = recipients(5);
        let mut rng = StdRng::seed_from_u64(1);

        let entries =
            build_fanout_entries(&campaign, &variants, &recipients, None, Utc::now(), &mut rng);

        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["variant 0", "variant 1", "variant 0", "variant 1", "variant 0"]
        );
    }

    #[test]
    fn test_fanout_without_policy_is_immediately_eligible() {
        let campaign = campaign();
        let entries = build_fanout_entries(
            &campaign,
            &variants(1),
            &recipients(3),
            None,
            Utc::now(),
            &mut StdRng::seed_from_u64(1),
        );

        assert!(entries.iter().all(|e| e.scheduled_for.is_none()));
        assert!(entries.iter().all(|e| e.campaign_id == Some(campaign.id)));
    }

    #[test]
    fn test_fanout_slots_are_chained_and_spaced() {
        let campaign = campaign();
        let throttle_policy = ThrottlePolicy::default();
        let now = Utc::now();

        let entries = build_fanout_entries(
            &campaign,
            &variants(3),
            &recipients(10),
            Some(&throttle_policy),
            now,
            &mut StdRng::seed_from_u64(5),
        );

        let slots: Vec<DateTime<Utc>> = entries.iter().map(|e| e.scheduled_for.unwrap()).collect();

        for pair in slots.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::seconds(30), "slots must not pile up");
            assert!(gap <= Duration::seconds(120));
        }
    }

    #[test]
    fn test_validate_campaign() {
        let good = CreateCampaign {
            tenant_id: uuid::Uuid::new_v4(),
            name: "update".to_string(),
            variants: variants(1),
            target: classline_storage::models::TargetSelector::AllGroups,
            scheduled_at: None,
        };
        assert!(validate_campaign(&good).is_ok());

        let mut no_name = good.clone();
        no_name.name = "  ".to_string();
        assert!(matches!(
            validate_campaign(&no_name),
            Err(CampaignError::Validation(_))
        ));

        let mut no_variants = good.clone();
        no_variants.variants = vec![];
        assert!(matches!(
            validate_campaign(&no_variants),
            Err(CampaignError::Validation(_))
        ));

        let mut blank_variant = good;
        blank_variant.variants = vec![MessageVariant {
            text: "".to_string(),
            media_ref: None,
        }];
        assert!(matches!(
            validate_campaign(&blank_variant),
            Err(CampaignError::Validation(_))
        ));
    }

    #[test]
    fn test_estimate_completion() {
        let now = Utc::now();

        assert_eq!(estimate_completion(0, 20, now), None);
        assert_eq!(estimate_completion(10, 0, now), None);
        assert_eq!(estimate_completion(10, 20, now), Some(now + Duration::hours(1)));
        assert_eq!(estimate_completion(45, 20, now), Some(now + Duration::hours(3)));
    }
}
