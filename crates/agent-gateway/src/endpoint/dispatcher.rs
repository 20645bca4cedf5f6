//! Final pipeline stage: look up the endpoint, validate params, run the
//! handler.
//!
//! Request body format is `{"params": {...}}`. An empty body or a body
//! without `params` calls the endpoint with no params. Handler faults and
//! panics become [`GatewayError::HandlerError`] carrying only the endpoint
//! name; the fault itself is logged.

use super::{AgentModule, EndpointRegistry, Handler};
use crate::domain::config::ConfigError;
use crate::domain::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Object-safe view of a dispatcher, independent of the module type.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Registered endpoint names, sorted.
    fn endpoint_names(&self) -> Vec<String>;

    async fn dispatch(&self, endpoint: &str, payload: &[u8]) -> GatewayResult<Value>;
}

/// Dispatcher owning one module instance and its endpoint table.
pub struct Dispatcher<M> {
    module: Arc<M>,
    registry: EndpointRegistry<M>,
}

impl<M: AgentModule> Dispatcher<M> {
    pub fn new(module: M) -> Result<Self, ConfigError> {
        Ok(Self {
            module: Arc::new(module),
            registry: EndpointRegistry::new(M::endpoints())?,
        })
    }

    pub fn module(&self) -> &Arc<M> {
        &self.module
    }
}

#[async_trait]
impl<M: AgentModule> Dispatch for Dispatcher<M> {
    fn endpoint_names(&self) -> Vec<String> {
        self.registry.names().into_iter().map(String::from).collect()
    }

    async fn dispatch(&self, endpoint: &str, payload: &[u8]) -> GatewayResult<Value> {
        let definition = self
            .registry
            .get(endpoint)
            .ok_or_else(|| GatewayError::UnknownEndpoint(endpoint.to_string()))?;

        let raw = parse_params(payload)?;
        let params = definition
            .schema()
            .validate(&raw)
            .map_err(GatewayError::InvalidParams)?;

        debug!(endpoint, is_async = definition.is_async(), "Dispatching");

        let outcome = match definition.handler() {
            Handler::Sync(f) => {
                let f = Arc::clone(f);
                let module = Arc::clone(&self.module);
                match tokio::task::spawn_blocking(move || f(&module, params)).await {
                    Ok(result) => result,
                    Err(join) if join.is_panic() => Err(anyhow::anyhow!(
                        "handler panicked: {}",
                        panic_message(join.into_panic())
                    )),
                    Err(join) => Err(anyhow::anyhow!("handler task failed: {join}")),
                }
            }
            Handler::Async(f) => {
                let module = Arc::clone(&self.module);
                let call = async move { f(module, params).await };
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(anyhow::anyhow!(
                        "handler panicked: {}",
                        panic_message(panic)
                    )),
                }
            }
        };

        outcome.map_err(|fault| {
            error!(endpoint, error = %fault, "Endpoint handler failed");
            GatewayError::HandlerError(endpoint.to_string())
        })
    }
}

fn parse_params(payload: &[u8]) -> GatewayResult<Map<String, Value>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let body: Value = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::invalid_param("body", format!("malformed JSON: {e}")))?;

    let Value::Object(mut body) = body else {
        return Err(GatewayError::invalid_param("body", "expected object"));
    };

    match body.remove("params") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(params)) => Ok(params),
        Some(_) => Err(GatewayError::invalid_param("params", "expected object")),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
