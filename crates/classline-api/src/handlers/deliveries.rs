//! Delivery entry handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use classline_core::QueueError;
use classline_storage::models::{DeliveryEntry, DeliveryStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{default_limit, ErrorResponse};
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Query parameters for listing delivery entries
#[derive(Debug, Deserialize)]
pub struct ListDeliveriesQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Delivery entry response
#[derive(Debug, Serialize)]
pub struct DeliveryEntryResponse {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub kind: String,
    pub chat_id: String,
    pub text: String,
    pub status: String,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DeliveryEntry> for DeliveryEntryResponse {
    fn from(e: DeliveryEntry) -> Self {
        Self {
            id: e.id,
            campaign_id: e.campaign_id,
            kind: e.kind,
            chat_id: e.chat_id,
            text: e.text,
            status: e.status,
            priority: e.priority,
            scheduled_for: e.scheduled_for,
            attempts: e.attempts,
            max_attempts: e.max_attempts,
            last_error: e.last_error,
            provider_message_id: e.provider_message_id,
            sent_at: e.sent_at,
            created_at: e.created_at,
        }
    }
}

/// Delivery entry list response
#[derive(Debug, Serialize)]
pub struct DeliveryListResponse {
    pub data: Vec<DeliveryEntryResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub(super) fn queue_error(e: QueueError) -> (StatusCode, Json<ErrorResponse>) {
    match e {
        QueueError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", "Delivery entry not found")),
        ),
        QueueError::Validation(message) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new("validation_error", message)),
        ),
        QueueError::AlreadyLeased => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                "already_leased",
                "Entry is being dispatched",
            )),
        ),
        QueueError::InvalidState => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                "invalid_state",
                "Entry state does not allow this operation",
            )),
        ),
        QueueError::Database(e) => {
            error!("Database error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal_error", "Database error")),
            )
        }
        QueueError::Internal(e) => {
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

/// List delivery entries for a tenant
///
/// GET /api/v1/tenants/:tenant_id/deliveries
pub async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListDeliveriesQuery>,
) -> Result<Json<DeliveryListResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let status = query
        .status
        .as_deref()
        .and_then(|s| s.parse::<DeliveryStatus>().ok());

    let entries = state
        .queue
        .list(tenant_id, status, query.limit, query.offset)
        .await
        .map_err(queue_error)?;

    let total = state
        .queue
        .count(tenant_id, status)
        .await
        .map_err(queue_error)?;

    Ok(Json(DeliveryListResponse {
        data: entries.into_iter().map(DeliveryEntryResponse::from).collect(),
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Fetch a single delivery entry
///
/// GET /api/v1/tenants/:tenant_id/deliveries/:id
pub async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeliveryEntryResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let entry = state.queue.get(tenant_id, id).await.map_err(queue_error)?;

    Ok(Json(DeliveryEntryResponse::from(entry)))
}

/// Cancel a pending or scheduled delivery entry
///
/// POST /api/v1/tenants/:tenant_id/deliveries/:id/cancel
pub async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeliveryEntryResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let entry = state
        .queue
        .cancel(tenant_id, id)
        .await
        .map_err(queue_error)?;

    Ok(Json(DeliveryEntryResponse::from(entry)))
}

/// Re-drive a permanently failed delivery entry
///
/// POST /api/v1/tenants/:tenant_id/deliveries/:id/requeue
pub async fn requeue_delivery(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeliveryEntryResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let entry = state
        .queue
        .requeue(tenant_id, id)
        .await
        .map_err(queue_error)?;

    Ok(Json(DeliveryEntryResponse::from(entry)))
}
