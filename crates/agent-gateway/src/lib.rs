// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Agent Gateway - request admission in front of a peer-to-peer agent.
//!
//! Every inbound call passes a fixed pipeline before business logic runs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          AGENT GATEWAY                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   POST /method/{endpoint}   (x-key, x-target, x-timestamp,           │
//! │                              x-signature headers + raw body)         │
//! │                 │                                                    │
//! │  ┌──────────────┴───────────────────────────────────────────┐        │
//! │  │                    Verifier Chain                         │        │
//! │  │  Lists → Signature/Target/Freshness/Permission → Limiter  │        │
//! │  └──────────────┬─────────────────────────┬─────────────────┘        │
//! │                 │                         │                          │
//! │  ┌──────────────┴─────────┐   ┌───────────┴─────────────┐            │
//! │  │   Endpoint Dispatcher  │   │ ChainView (TTL cache,   │            │
//! │  │  schema → sync/async   │   │ single-flight refresh)  │            │
//! │  └────────────────────────┘   └───────────┬─────────────┘            │
//! └───────────────────────────────────────────┼──────────────────────────┘
//!                                             │
//!                                        ChainClient
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use agent_gateway::{Gateway, GatewayConfig};
//!
//! let gateway = Arc::new(Gateway::new(config, keypair.address(), module, chain)?);
//! gateway.serve(shutdown_signal()).await?;
//! ```
//!
//! # Security
//!
//! - Rate-limit tokens are only consumed after the signature has been checked
//! - Upstream failures reject the request (fail closed)
//! - Handler faults are logged, never returned to the caller

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod demo;
pub mod domain;
pub mod endpoint;
pub mod middleware;
pub mod ports;
pub mod router;
pub mod service;
pub mod telemetry;
pub mod upstream;

// Re-exports for public API
pub use adapters::StaticChainClient;
pub use domain::config::{GatewayConfig, LimiterConfig, Network};
pub use domain::envelope::RequestEnvelope;
pub use domain::error::{ApiError, ErrorKind, GatewayError, GatewayResult, ServiceError};
pub use endpoint::{AgentModule, EndpointDefinition, ParamSchema, ParamSpec, Params};
pub use ports::{ChainClient, PermissionSet, TimeSource, UpstreamError};
pub use router::build_router;
pub use service::Gateway;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
