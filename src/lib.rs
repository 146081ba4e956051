//! DexBridge Relayer - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod chains;
pub mod client;
pub mod config;
pub mod contracts;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod scheduler;
pub mod settlement;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod watchers;
