//! Classline API - REST surface for the delivery scheduler
//!
//! Enqueue, query, campaign, and throttle-settings endpoints, scoped per
//! tenant by API-key authentication.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use routes::create_router;
