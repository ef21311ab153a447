//! Delivery channel - the external messaging provider boundary

mod adapter;
mod directory;
mod gateway;

pub use adapter::{ChannelAdapter, ChannelError};
pub use directory::GatewayDirectory;
pub use gateway::GatewayAdapter;
