//! Common types for Classline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for tenants
pub type TenantId = Uuid;

/// Unique identifier for delivery entries
pub type DeliveryEntryId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Purpose tag on a delivery entry.
///
/// Informational only; scheduling treats all kinds the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    ClassSummary,
    PersonalReport,
    BroadcastItem,
}

impl std::fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryKind::ClassSummary => write!(f, "class_summary"),
            DeliveryKind::PersonalReport => write!(f, "personal_report"),
            DeliveryKind::BroadcastItem => write!(f, "broadcast_item"),
        }
    }
}

impl std::str::FromStr for DeliveryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "class_summary" => Ok(DeliveryKind::ClassSummary),
            "personal_report" => Ok(DeliveryKind::PersonalReport),
            "broadcast_item" => Ok(DeliveryKind::BroadcastItem),
            _ => Err(format!("Invalid delivery kind: {}", s)),
        }
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_kind_round_trip() {
        for kind in [
            DeliveryKind::ClassSummary,
            DeliveryKind::PersonalReport,
            DeliveryKind::BroadcastItem,
        ] {
            let parsed: DeliveryKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_delivery_kind_invalid() {
        assert!("newsletter".parse::<DeliveryKind>().is_err());
    }
}
