//! Throttle policy - per-tenant send pacing, caps, and quiet hours

pub mod policy;

mod limiter;

pub use limiter::Throttle;
