//! Dispatcher - the recurring loop that drives deliveries

mod dispatcher;

pub use dispatcher::{Dispatcher, DispatcherConfig};
