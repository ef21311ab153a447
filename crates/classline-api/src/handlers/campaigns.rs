//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use classline_core::{CampaignError, CampaignStats};
use classline_storage::models::{
    Campaign, CampaignStatus, CreateCampaign, DeliveryStatus, MessageVariant, TargetSelector,
};
use classline_storage::repository::DeliveryEntryRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::deliveries::{DeliveryEntryResponse, DeliveryListResponse};
use super::{default_limit, ErrorResponse};
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Query parameters for listing campaign deliveries
#[derive(Debug, Deserialize)]
pub struct CampaignDeliveriesQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub variants: serde_json::Value,
    pub target: serde_json::Value,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub progress_percentage: f64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress = c.progress_percentage();
        Self {
            id: c.id,
            name: c.name,
            variants: c.variants,
            target: c.target,
            status: c.status,
            total_recipients: c.total_recipients,
            sent_count: c.sent_count,
            failed_count: c.failed_count,
            progress_percentage: progress,
            scheduled_at: c.scheduled_at,
            last_error: c.last_error,
            started_at: c.started_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Campaign list response
#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub variants: Vec<MessageVariant>,
    pub target: TargetSelector,
    pub scheduled_at: Option<DateTime<Utc>>,
}

fn campaign_error(e: CampaignError) -> (StatusCode, Json<ErrorResponse>) {
    match e {
        CampaignError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", "Campaign not found")),
        ),
        CampaignError::Validation(message) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new("validation_error", message)),
        ),
        CampaignError::NoRecipients => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(
                "no_recipients",
                "Campaign target resolved to no recipients",
            )),
        ),
        CampaignError::NotStartable => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                "invalid_state",
                "Campaign is not in a startable state",
            )),
        ),
        CampaignError::NotCancellable => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                "invalid_state",
                "Campaign is not in a cancellable state",
            )),
        ),
        CampaignError::Database(e) => {
            error!("Database error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal_error", "Database error")),
            )
        }
        CampaignError::Internal(e) => {
            error!("Internal error: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal_error", "Internal error")),
            )
        }
    }
}

fn forbidden(status: StatusCode) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse::new(
            "forbidden",
            "Not authorized for this tenant",
        )),
    )
}

/// Create a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let campaign = state
        .orchestrator
        .create_campaign(CreateCampaign {
            tenant_id,
            name: body.name,
            variants: body.variants,
            target: body.target,
            scheduled_at: body.scheduled_at,
        })
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
}

/// List campaigns for a tenant
///
/// GET /api/v1/tenants/:tenant_id/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignListResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let status = query
        .status
        .as_deref()
        .and_then(|s| s.parse::<CampaignStatus>().ok());

    let campaigns = state
        .orchestrator
        .list_campaigns(tenant_id, status, query.limit, query.offset)
        .await
        .map_err(campaign_error)?;

    let total = state
        .orchestrator
        .count_campaigns(tenant_id, status)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignListResponse {
        data: campaigns.into_iter().map(CampaignResponse::from).collect(),
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Fetch a single campaign
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let campaign = state
        .orchestrator
        .get_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Start a campaign: resolve recipients and fan out delivery entries
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let campaign = state
        .orchestrator
        .start_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Cancel a campaign and its not-yet-dispatched entries
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let campaign = state
        .orchestrator
        .cancel_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Derived campaign statistics
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/stats
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignStats>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let stats = state
        .orchestrator
        .stats(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    Ok(Json(stats))
}

/// List a campaign's child delivery entries
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/deliveries
pub async fn list_campaign_deliveries(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<CampaignDeliveriesQuery>,
) -> Result<Json<DeliveryListResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    // Tenant scoping: the campaign must belong to the caller.
    state
        .orchestrator
        .get_campaign(tenant_id, campaign_id)
        .await
        .map_err(campaign_error)?;

    let status = query
        .status
        .as_deref()
        .and_then(|s| s.parse::<DeliveryStatus>().ok());

    let repo = DeliveryEntryRepository::new(state.db_pool.pool().clone());

    let entries = repo
        .list_by_campaign(campaign_id, status, query.limit, query.offset)
        .await
        .map_err(|e| {
            error!("Failed to list campaign deliveries: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal_error", "Database error")),
            )
        })?;

    let counts = repo.campaign_status_counts(campaign_id).await.map_err(|e| {
        error!("Failed to count campaign deliveries: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("internal_error", "Database error")),
        )
    })?;

    Ok(Json(DeliveryListResponse {
        data: entries.into_iter().map(DeliveryEntryResponse::from).collect(),
        total: counts.total(),
        limit: query.limit,
        offset: query.offset,
    }))
}
