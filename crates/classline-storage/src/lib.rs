//! Classline Storage - Database layer
//!
//! This crate provides the PostgreSQL-backed store for delivery entries,
//! campaigns, throttle policies, and tenants. All status transitions are
//! expressed as single conditional updates so concurrent dispatchers cannot
//! double-claim an entry.

pub mod db;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use models::*;
pub use repository::*;
