//! API handlers

use serde::Serialize;

pub mod campaigns;
pub mod deliveries;
pub mod health;
pub mod send;
pub mod settings;

/// Error response body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

fn default_limit() -> i64 {
    50
}
