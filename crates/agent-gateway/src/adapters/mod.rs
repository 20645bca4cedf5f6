//! Adapters for the gateway's outbound ports.

pub mod chain;

pub use chain::{AccountRecord, StaticChainClient};
