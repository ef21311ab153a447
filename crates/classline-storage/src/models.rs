//! Database models

use chrono::{DateTime, Utc};
use classline_common::types::{CampaignId, DeliveryKind, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tenant model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create tenant input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub api_key_hash: String,
    pub api_key_prefix: String,
}

/// Delivery entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Scheduled,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Sent | DeliveryStatus::Failed | DeliveryStatus::Cancelled
        )
    }

    /// Whether an entry in this status may still be cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Scheduled)
    }

    /// Whether the status machine allows moving from `self` to `next`.
    ///
    /// Entries move monotonically forward: Pending/Scheduled feed Processing,
    /// Processing resolves to Sent, Failed, or back to Pending for a retry.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        match (*self, next) {
            (Pending, Processing) | (Scheduled, Processing) => true,
            (Pending, Cancelled) | (Scheduled, Cancelled) => true,
            (Processing, Sent) | (Processing, Failed) | (Processing, Pending) => true,
            // Manual re-drive of a permanently failed entry.
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Scheduled => write!(f, "scheduled"),
            DeliveryStatus::Processing => write!(f, "processing"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "scheduled" => Ok(DeliveryStatus::Scheduled),
            "processing" => Ok(DeliveryStatus::Processing),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "cancelled" => Ok(DeliveryStatus::Cancelled),
            _ => Err(format!("Invalid delivery status: {}", s)),
        }
    }
}

/// Delivery entry model - one unit of outbound work
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryEntry {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    pub campaign_id: Option<CampaignId>,
    pub kind: String,
    pub chat_id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub status: String,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub leased_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryEntry {
    /// Get status enum
    pub fn status_enum(&self) -> Option<DeliveryStatus> {
        self.status.parse().ok()
    }

    /// Get kind enum
    pub fn kind_enum(&self) -> Option<DeliveryKind> {
        self.kind.parse().ok()
    }
}

/// Create delivery entry input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeliveryEntry {
    pub tenant_id: TenantId,
    pub campaign_id: Option<CampaignId>,
    pub kind: DeliveryKind,
    pub chat_id: String,
    pub text: String,
    pub metadata: Option<serde_json::Value>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub max_attempts: Option<i32>,
}

/// Message variant for a campaign.
///
/// Variants are rotated over recipients so a broadcast does not send the
/// same wording to every chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageVariant {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

/// Campaign target selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSelector {
    AllGroups,
    SelectedGroups { group_ids: Vec<String> },
    AllContacts,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    /// Whether a campaign in this status may be started
    pub fn is_startable(&self) -> bool {
        matches!(self, CampaignStatus::Pending | CampaignStatus::Scheduled)
    }

    /// Whether a campaign in this status may be cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Pending | CampaignStatus::Scheduled | CampaignStatus::InProgress
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Pending => write!(f, "pending"),
            CampaignStatus::Scheduled => write!(f, "scheduled"),
            CampaignStatus::InProgress => write!(f, "in_progress"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CampaignStatus::Pending),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "in_progress" => Ok(CampaignStatus::InProgress),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "failed" => Ok(CampaignStatus::Failed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model - the aggregate root for a broadcast
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub variants: serde_json::Value,
    pub target: serde_json::Value,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Get message variants
    pub fn variants_vec(&self) -> Vec<MessageVariant> {
        serde_json::from_value(self.variants.clone()).unwrap_or_default()
    }

    /// Get target selector
    pub fn target_selector(&self) -> Option<TargetSelector> {
        serde_json::from_value(self.target.clone()).ok()
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients == 0 {
            0.0
        } else {
            ((self.sent_count + self.failed_count) as f64 / self.total_recipients as f64) * 100.0
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    pub variants: Vec<MessageVariant>,
    pub target: TargetSelector,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Throttle policy model (per tenant, lazily created with defaults)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    pub id: uuid::Uuid,
    pub tenant_id: TenantId,
    /// Lower bound for randomized inter-message spacing (seconds)
    pub min_delay_secs: i32,
    /// Upper bound for randomized inter-message spacing (seconds)
    pub max_delay_secs: i32,
    pub max_per_hour: i32,
    pub max_per_day: Option<i32>,
    /// Quiet hours window start, local hour of day; None disables the window
    pub quiet_start_hour: Option<i32>,
    /// Quiet hours window end, local hour of day
    pub quiet_end_hour: Option<i32>,
    /// Tenant's offset from UTC, used to evaluate quiet hours in local time
    pub tz_offset_minutes: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::nil(),
            tenant_id: uuid::Uuid::nil(),
            min_delay_secs: 30,
            max_delay_secs: 120,
            max_per_hour: 20,
            max_per_day: None,
            quiet_start_hour: None,
            quiet_end_hour: None,
            tz_offset_minutes: 0,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// Update throttle policy input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateThrottlePolicy {
    pub tenant_id: TenantId,
    pub min_delay_secs: Option<i32>,
    pub max_delay_secs: Option<i32>,
    pub max_per_hour: Option<i32>,
    pub max_per_day: Option<Option<i32>>,
    pub quiet_start_hour: Option<Option<i32>>,
    pub quiet_end_hour: Option<Option<i32>>,
    pub tz_offset_minutes: Option<i32>,
    pub enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delivery_status_round_trip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Scheduled,
            DeliveryStatus::Processing,
            DeliveryStatus::Sent,
            DeliveryStatus::Failed,
            DeliveryStatus::Cancelled,
        ] {
            let parsed: DeliveryStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_transitions_forward_only() {
        use DeliveryStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Scheduled.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Sent));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Scheduled.can_transition_to(Cancelled));

        // Terminal states never move forward on their own.
        assert!(!Sent.can_transition_to(Pending));
        assert!(!Sent.can_transition_to(Processing));
        assert!(!Cancelled.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));

        // In-flight entries cannot be cancelled.
        assert!(!Processing.can_transition_to(Cancelled));

        // Manual re-drive is the one path out of Failed.
        assert!(Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_and_cancellable() {
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());
        assert!(!DeliveryStatus::Processing.is_terminal());

        assert!(DeliveryStatus::Pending.is_cancellable());
        assert!(DeliveryStatus::Scheduled.is_cancellable());
        assert!(!DeliveryStatus::Processing.is_cancellable());
        assert!(!DeliveryStatus::Sent.is_cancellable());
    }

    #[test]
    fn test_target_selector_serde() {
        let selector = TargetSelector::SelectedGroups {
            group_ids: vec!["g1".to_string(), "g2".to_string()],
        };
        let value = serde_json::to_value(&selector).unwrap();
        assert_eq!(value["type"], "selected_groups");

        let parsed: TargetSelector = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, selector);

        let all: TargetSelector = serde_json::from_value(serde_json::json!({
            "type": "all_contacts"
        }))
        .unwrap();
        assert_eq!(all, TargetSelector::AllContacts);
    }

    #[test]
    fn test_campaign_progress() {
        let mut campaign = Campaign {
            id: uuid::Uuid::nil(),
            tenant_id: uuid::Uuid::nil(),
            name: "term report".to_string(),
            variants: serde_json::json!([]),
            target: serde_json::json!({"type": "all_groups"}),
            status: "in_progress".to_string(),
            total_recipients: 4,
            sent_count: 2,
            failed_count: 1,
            scheduled_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        assert_eq!(campaign.progress_percentage(), 75.0);

        campaign.total_recipients = 0;
        assert_eq!(campaign.progress_percentage(), 0.0);
    }

    #[test]
    fn test_campaign_status_predicates() {
        assert!(CampaignStatus::Pending.is_startable());
        assert!(CampaignStatus::Scheduled.is_startable());
        assert!(!CampaignStatus::InProgress.is_startable());

        assert!(CampaignStatus::InProgress.is_cancellable());
        assert!(!CampaignStatus::Completed.is_cancellable());
        assert!(!CampaignStatus::Failed.is_cancellable());
    }

    #[test]
    fn test_throttle_policy_defaults() {
        let policy = ThrottlePolicy::default();
        assert_eq!(policy.min_delay_secs, 30);
        assert_eq!(policy.max_delay_secs, 120);
        assert_eq!(policy.max_per_hour, 20);
        assert_eq!(policy.max_per_day, None);
        assert_eq!(policy.quiet_start_hour, None);
        assert!(policy.enabled);
    }
}
