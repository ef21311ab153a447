//! Throttle settings handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use classline_storage::models::{ThrottlePolicy, UpdateThrottlePolicy};
use classline_storage::repository::ThrottlePolicyRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::ErrorResponse;
use crate::auth::{require_tenant_access, AppState, AuthContext};

/// Throttle policy response
#[derive(Debug, Serialize)]
pub struct ThrottlePolicyResponse {
    pub min_delay_secs: i32,
    pub max_delay_secs: i32,
    pub max_per_hour: i32,
    pub max_per_day: Option<i32>,
    pub quiet_start_hour: Option<i32>,
    pub quiet_end_hour: Option<i32>,
    pub tz_offset_minutes: i32,
    pub enabled: bool,
}

impl From<ThrottlePolicy> for ThrottlePolicyResponse {
    fn from(p: ThrottlePolicy) -> Self {
        Self {
            min_delay_secs: p.min_delay_secs,
            max_delay_secs: p.max_delay_secs,
            max_per_hour: p.max_per_hour,
            max_per_day: p.max_per_day,
            quiet_start_hour: p.quiet_start_hour,
            quiet_end_hour: p.quiet_end_hour,
            tz_offset_minutes: p.tz_offset_minutes,
            enabled: p.enabled,
        }
    }
}

/// Request body for updating the throttle policy.
///
/// Absent fields keep their current value; `clear_quiet_hours` switches the
/// quiet window off.
#[derive(Debug, Deserialize)]
pub struct UpdateThrottlePolicyRequest {
    pub min_delay_secs: Option<i32>,
    pub max_delay_secs: Option<i32>,
    pub max_per_hour: Option<i32>,
    pub max_per_day: Option<i32>,
    pub quiet_start_hour: Option<i32>,
    pub quiet_end_hour: Option<i32>,
    pub tz_offset_minutes: Option<i32>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub clear_quiet_hours: bool,
}

fn validate_update(body: &UpdateThrottlePolicyRequest) -> Result<(), String> {
    if let Some(min) = body.min_delay_secs {
        if min < 0 {
            return Err("min_delay_secs must not be negative".to_string());
        }
    }
    if let (Some(min), Some(max)) = (body.min_delay_secs, body.max_delay_secs) {
        if max < min {
            return Err("max_delay_secs must be >= min_delay_secs".to_string());
        }
    }
    if let Some(per_hour) = body.max_per_hour {
        if per_hour < 1 {
            return Err("max_per_hour must be at least 1".to_string());
        }
    }
    for hour in [body.quiet_start_hour, body.quiet_end_hour].into_iter().flatten() {
        if !(0..24).contains(&hour) {
            return Err("quiet hours must be between 0 and 23".to_string());
        }
    }
    Ok(())
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

fn db_error(e: sqlx::Error) -> (StatusCode, Json<ErrorResponse>) {
    error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal_error", "Database error")),
    )
}

/// Get the tenant's throttle policy (defaults if never configured)
///
/// GET /api/v1/tenants/:tenant_id/settings/throttle
pub async fn get_throttle_policy(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<ThrottlePolicyResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    let repo = ThrottlePolicyRepository::new(state.db_pool.pool().clone());
    let policy = repo.get_or_default(tenant_id).await.map_err(db_error)?;

    Ok(Json(ThrottlePolicyResponse::from(policy)))
}

/// Update the tenant's throttle policy
///
/// PUT /api/v1/tenants/:tenant_id/settings/throttle
pub async fn update_throttle_policy(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<Uuid>,
    Json(body): Json<UpdateThrottlePolicyRequest>,
) -> Result<Json<ThrottlePolicyResponse>, (StatusCode, Json<ErrorResponse>)> {
    require_tenant_access(&auth, tenant_id).map_err(forbidden)?;

    validate_update(&body).map_err(|message| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new("validation_error", message)),
        )
    })?;

    let quiet_start_hour = if body.clear_quiet_hours {
        Some(None)
    } else {
        body.quiet_start_hour.map(Some)
    };
    let quiet_end_hour = if body.clear_quiet_hours {
        Some(None)
    } else {
        body.quiet_end_hour.map(Some)
    };

    let repo = ThrottlePolicyRepository::new(state.db_pool.pool().clone());
    let policy = repo
        .upsert(UpdateThrottlePolicy {
            tenant_id,
            min_delay_secs: body.min_delay_secs,
            max_delay_secs: body.max_delay_secs,
            max_per_hour: body.max_per_hour,
            max_per_day: body.max_per_day.map(Some),
            quiet_start_hour,
            quiet_end_hour,
            tz_offset_minutes: body.tz_offset_minutes,
            enabled: body.enabled,
        })
        .await
        .map_err(db_error)?;

    // The dispatcher reads policies through the throttle cache.
    state.throttle.invalidate(tenant_id).await;

    info!(%tenant_id, "Throttle policy updated");

    Ok(Json(ThrottlePolicyResponse::from(policy)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn empty_request() -> UpdateThrottlePolicyRequest {
        UpdateThrottlePolicyRequest {
            min_delay_secs: None,
            max_delay_secs: None,
            max_per_hour: None,
            max_per_day: None,
            quiet_start_hour: None,
            quiet_end_hour: None,
            tz_offset_minutes: None,
            enabled: None,
            clear_quiet_hours: false,
        }
    }

    #[test]
    fn test_validate_accepts_empty_update() {
        assert_eq!(validate_update(&empty_request()), Ok(()));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut body = empty_request();
        body.min_delay_secs = Some(60);
        body.max_delay_secs = Some(30);
        assert!(validate_update(&body).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_hours() {
        let mut body = empty_request();
        body.quiet_start_hour = Some(24);
        assert!(validate_update(&body).is_err());

        let mut body = empty_request();
        body.quiet_end_hour = Some(-1);
        assert!(validate_update(&body).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_hourly_cap() {
        let mut body = empty_request();
        body.max_per_hour = Some(0);
        assert!(validate_update(&body).is_err());
    }
}
