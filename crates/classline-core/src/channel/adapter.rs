//! Channel adapter contract

use async_trait::async_trait;
use thiserror::Error;

/// Channel error, split by whether a retry can help.
///
/// The dispatcher reads this distinction before counting an attempt toward
/// `max_attempts` versus failing the entry outright.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Network or provider hiccup; retrying may succeed
    #[error("transient channel error: {0}")]
    Transient(String),

    /// Bad recipient, blocked sender, or malformed request; retrying cannot help
    #[error("permanent channel error: {0}")]
    Permanent(String),
}

impl ChannelError {
    /// Whether this failure is final for the entry
    pub fn is_permanent(&self) -> bool {
        matches!(self, ChannelError::Permanent(_))
    }
}

/// The external messaging provider.
///
/// Implementations own nothing beyond connection config: the contract is
/// "accept a chat identifier and a text body, return a provider message id
/// or fail".
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Send one message, returning the provider's message id
    async fn send(&self, chat_id: &str, text: &str) -> Result<String, ChannelError>;
}
