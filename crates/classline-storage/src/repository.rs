//! Repositories for Classline models

pub mod campaigns;
pub mod delivery_entries;
pub mod tenants;
pub mod throttle_policies;

pub use campaigns::CampaignRepository;
pub use delivery_entries::{DeliveryEntryRepository, DeliveryStatusCounts};
pub use tenants::TenantRepository;
pub use throttle_policies::ThrottlePolicyRepository;
