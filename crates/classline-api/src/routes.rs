//! API routes

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{campaigns, deliveries, health, send, settings};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Direct send routes
    let send_routes = Router::new().route("/", post(send::send_message));

    // Delivery entry routes
    let delivery_routes = Router::new()
        .route("/", get(deliveries::list_deliveries))
        .route("/:id", get(deliveries::get_delivery))
        .route("/:id/cancel", post(deliveries::cancel_delivery))
        .route("/:id/requeue", post(deliveries::requeue_delivery));

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/", get(campaigns::list_campaigns))
        .route("/", post(campaigns::create_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign))
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats))
        .route(
            "/:campaign_id/deliveries",
            get(campaigns::list_campaign_deliveries),
        );

    // Settings routes
    let settings_routes = Router::new()
        .route("/throttle", get(settings::get_throttle_policy))
        .route("/throttle", put(settings::update_throttle_policy));

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .nest("/tenants/:tenant_id/send", send_routes)
        .nest("/tenants/:tenant_id/deliveries", delivery_routes)
        .nest("/tenants/:tenant_id/campaigns", campaign_routes)
        .nest("/tenants/:tenant_id/settings", settings_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
}
