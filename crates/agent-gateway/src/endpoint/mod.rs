//! Endpoint registration.
//!
//! An agent module lists its endpoints once via [`AgentModule::endpoints`].
//! Each definition pairs a name with a [`ParamSchema`] and a handler, which
//! is either synchronous (run on the blocking pool) or asynchronous. The
//! resulting [`EndpointRegistry`] is immutable.

pub mod dispatcher;
pub mod schema;

pub use dispatcher::{Dispatch, Dispatcher};
pub use schema::{ParamSchema, ParamSpec, ParamType, Params};

use crate::domain::config::ConfigError;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by an asynchronous handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

type SyncFn<M> = dyn Fn(&M, Params) -> anyhow::Result<Value> + Send + Sync;
type AsyncFn<M> = dyn Fn(Arc<M>, Params) -> HandlerFuture + Send + Sync;

/// Type-erased endpoint handler.
pub enum Handler<M> {
    Sync(Arc<SyncFn<M>>),
    Async(Arc<AsyncFn<M>>),
}

impl<M> Clone for Handler<M> {
    fn clone(&self) -> Self {
        match self {
            Handler::Sync(f) => Handler::Sync(Arc::clone(f)),
            Handler::Async(f) => Handler::Async(Arc::clone(f)),
        }
    }
}

/// A named, schema-checked operation on a module.
pub struct EndpointDefinition<M> {
    name: String,
    schema: ParamSchema,
    handler: Handler<M>,
}

impl<M: Send + Sync + 'static> EndpointDefinition<M> {
    /// Register a synchronous handler.
    pub fn sync_fn<F, R>(name: impl Into<String>, schema: ParamSchema, handler: F) -> Self
    where
        F: Fn(&M, Params) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Serialize,
    {
        let handler = move |module: &M, params: Params| -> anyhow::Result<Value> {
            Ok(serde_json::to_value(handler(module, params)?)?)
        };
        Self {
            name: name.into(),
            schema,
            handler: Handler::Sync(Arc::new(handler)),
        }
    }

    /// Register an asynchronous handler.
    pub fn async_fn<F, Fut, R>(name: impl Into<String>, schema: ParamSchema, handler: F) -> Self
    where
        F: Fn(Arc<M>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let handler = move |module: Arc<M>, params: Params| -> HandlerFuture {
            let fut = handler(module, params);
            Box::pin(async move { Ok(serde_json::to_value(fut.await?)?) })
        };
        Self {
            name: name.into(),
            schema,
            handler: Handler::Async(Arc::new(handler)),
        }
    }
}

impl<M> EndpointDefinition<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn handler(&self) -> &Handler<M> {
        &self.handler
    }

    pub fn is_async(&self) -> bool {
        matches!(self.handler, Handler::Async(_))
    }
}

impl<M> fmt::Debug for EndpointDefinition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDefinition")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("async", &self.is_async())
            .finish()
    }
}

/// A module whose endpoints the gateway exposes.
pub trait AgentModule: Send + Sync + Sized + 'static {
    fn endpoints() -> Vec<EndpointDefinition<Self>>;
}

/// Name → definition table, fixed after construction.
pub struct EndpointRegistry<M> {
    endpoints: HashMap<String, EndpointDefinition<M>>,
}

impl<M> EndpointRegistry<M> {
    pub fn new(
        definitions: impl IntoIterator<Item = EndpointDefinition<M>>,
    ) -> Result<Self, ConfigError> {
        let mut endpoints = HashMap::new();
        for definition in definitions {
            if !is_valid_name(&definition.name) {
                return Err(ConfigError::InvalidEndpointName(definition.name));
            }
            if endpoints.contains_key(&definition.name) {
                return Err(ConfigError::DuplicateEndpoint(definition.name));
            }
            endpoints.insert(definition.name.clone(), definition);
        }
        Ok(Self { endpoints })
    }

    pub fn get(&self, name: &str) -> Option<&EndpointDefinition<M>> {
        self.endpoints.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Names travel as a URL path segment.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
