//! Direct send handler

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use classline_common::types::DeliveryKind;
use classline_storage::models::CreateDeliveryEntry;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::deliveries::{queue_error, DeliveryEntryResponse};
use super::ErrorResponse;
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Request body for enqueueing a message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub text: String,
    pub kind: Option<DeliveryKind>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub max_attempts: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

/// Enqueue one message for delivery.
///
/// Returns immediately with the stored entry; the dispatcher picks it up
/// once the throttle policy allows.
///
/// POST /api/v1/tenants/:tenant_id/send
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<DeliveryEntryResponse>), (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(|status| {
        (
            status,
            Json(ErrorResponse::new(
                "forbidden",
                "Not authorized for this tenant",
            )),
        )
    })?;

    let entry = state
        .queue
        .enqueue(CreateDeliveryEntry {
            tenant_id,
            campaign_id: None,
            kind: body.kind.unwrap_or(DeliveryKind::PersonalReport),
            chat_id: body.chat_id,
            text: body.text,
            metadata: body.metadata,
            scheduled_for: body.scheduled_for,
            priority: body.priority,
            max_attempts: body.max_attempts,
        })
        .await
        .map_err(queue_error)?;

    Ok((StatusCode::CREATED, Json(DeliveryEntryResponse::from(entry))))
}
