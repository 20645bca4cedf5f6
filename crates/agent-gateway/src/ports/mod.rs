//! Ports (interfaces) for the gateway's external collaborators.

pub mod outbound;

pub use outbound::{ChainClient, PermissionSet, SystemTimeSource, TimeSource, UpstreamError};
