//! Delivery queue - durable store and status machine for outbound work

mod manager;

pub use manager::{failure_disposition, DeliveryQueue, FailureDisposition, QueueError};
