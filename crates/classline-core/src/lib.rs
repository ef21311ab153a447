//! Classline Core - Outbound message delivery scheduling
//!
//! The core takes a logical "send this text to this chat" request and turns
//! it into an actual delivery through a rate-limited external channel:
//! per-tenant throttling, scheduled delivery, campaign fan-out, retry on
//! failure, and quiet hours.

pub mod broadcast;
pub mod channel;
pub mod dispatch;
pub mod queue;
pub mod throttle;

pub use broadcast::{BroadcastOrchestrator, CampaignError, CampaignStats, Directory, RecipientRef};
pub use channel::{ChannelAdapter, ChannelError, GatewayAdapter, GatewayDirectory};
pub use dispatch::{Dispatcher, DispatcherConfig};
pub use queue::{DeliveryQueue, QueueError};
pub use throttle::Throttle;
