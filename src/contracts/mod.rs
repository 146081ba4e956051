//! Contract bindings

pub mod bridge;

pub use bridge::DexBridge;
