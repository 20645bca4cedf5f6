//! Gateway service - composes the admission pipeline and the dispatcher.

use crate::domain::cache::random_ttl;
use crate::domain::config::GatewayConfig;
use crate::domain::envelope::RequestEnvelope;
use crate::domain::error::{GatewayError, GatewayResult, ServiceError};
use crate::endpoint::{AgentModule, Dispatch, Dispatcher};
use crate::middleware::auth::PermissionGate;
use crate::middleware::{
    sweep_task, AccessLists, ListVerifier, RateLimiter, RequestContext, SignatureVerifier,
    Verifier, VerifierChain,
};
use crate::ports::{ChainClient, SystemTimeSource, TimeSource};
use crate::router::build_router;
use crate::upstream::ChainView;
use agent_crypto::AgentAddress;
use serde_json::Value;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Admission gateway in front of one agent module.
pub struct Gateway {
    config: GatewayConfig,
    identity: AgentAddress,
    lists: Arc<AccessLists>,
    chain: Arc<ChainView>,
    limiter: Arc<RateLimiter>,
    pipeline: VerifierChain,
    dispatcher: Arc<dyn Dispatch>,
}

impl Gateway {
    /// Create a gateway for `module`, answering to `identity`.
    pub fn new<M: AgentModule>(
        config: GatewayConfig,
        identity: AgentAddress,
        module: M,
        chain: Arc<dyn ChainClient>,
    ) -> Result<Self, ServiceError> {
        Self::with_time_source(config, identity, module, chain, Arc::new(SystemTimeSource))
    }

    /// Same as [`Gateway::new`] with an explicit clock for freshness checks.
    pub fn with_time_source<M: AgentModule>(
        config: GatewayConfig,
        identity: AgentAddress,
        module: M,
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let dispatcher = Dispatcher::new(module)?;

        // One lifetime per gateway, not per key
        let ttl = random_ttl(config.cache.lower_ttl, config.cache.upper_ttl);
        let chain = Arc::new(ChainView::new(
            chain,
            config.network,
            ttl,
            config.upstream_timeout,
        ));

        let lists = Arc::new(AccessLists::from_config(&config.lists));

        let mut auth = SignatureVerifier::new(identity, config.max_request_staleness, clock);
        if let Some(permission) = &config.required_permission {
            auth = auth.with_permission(PermissionGate::new(permission.clone(), Arc::clone(&chain)));
        }

        let limiter = Arc::new(RateLimiter::from_config(&config.limiter, Arc::clone(&chain)));
        let pipeline = VerifierChain::new(
            ListVerifier::new(Arc::clone(&lists)),
            auth,
            Arc::clone(&limiter),
        );

        info!(
            identity = %identity,
            network = ?config.network,
            cache_ttl_secs = ttl.as_secs(),
            limiter = limiter.name(),
            stages = ?pipeline.stage_names(),
            endpoints = ?dispatcher.endpoint_names(),
            "Gateway initialized"
        );

        Ok(Self {
            config,
            identity,
            lists,
            chain,
            limiter,
            pipeline,
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Run one request through the pipeline and the dispatcher.
    ///
    /// The whole evaluation is bounded by `request_timeout`; on expiry all
    /// outstanding work for the request is dropped.
    pub async fn handle(&self, envelope: RequestEnvelope, peer_ip: IpAddr) -> GatewayResult<Value> {
        let request_id = Uuid::now_v7();
        let span = info_span!(
            "agent_request",
            %request_id,
            endpoint = %envelope.endpoint,
            peer = %peer_ip,
        );

        async move {
            let deadline = self.config.request_timeout;
            let started = tokio::time::Instant::now();
            let result = match tokio::time::timeout(deadline, self.process(envelope, peer_ip)).await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(deadline.as_millis() as u64)),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => info!(elapsed_ms, "Request served"),
                Err(e) => info!(elapsed_ms, kind = %e.kind(), "Request not served"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process(&self, envelope: RequestEnvelope, peer_ip: IpAddr) -> GatewayResult<Value> {
        let mut ctx = RequestContext::new(envelope, peer_ip);
        self.pipeline.run(&mut ctx).await?;
        self.dispatcher
            .dispatch(&ctx.envelope.endpoint, &ctx.envelope.payload)
            .await
    }

    /// Reject every later request claiming `address`.
    pub fn add_to_blacklist(&self, address: AgentAddress) -> bool {
        self.lists.add_to_blacklist(address)
    }

    /// Admit `address`; once the whitelist is non-empty only listed senders pass.
    pub fn add_to_whitelist(&self, address: AgentAddress) -> bool {
        self.lists.add_to_whitelist(address)
    }

    /// Reject every later request from `ip`.
    pub fn add_to_ip_blacklist(&self, ip: IpAddr) -> bool {
        self.lists.add_to_ip_blacklist(ip)
    }

    pub fn identity(&self) -> AgentAddress {
        self.identity
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn lists(&self) -> &AccessLists {
        &self.lists
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Lifetime drawn for upstream cache entries.
    pub fn cache_ttl(&self) -> Duration {
        self.chain.ttl()
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.dispatcher.endpoint_names()
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve(
        self: Arc<Self>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServiceError> {
        let listener = TcpListener::bind(self.config.bind)
            .await
            .map_err(ServiceError::Bind)?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve_on(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServiceError> {
        let addr = listener.local_addr().map_err(ServiceError::Bind)?;

        let sweeper = tokio::spawn(sweep_task(
            Arc::clone(&self.limiter),
            self.config.bucket_sweep_interval,
            self.config.bucket_idle_eviction,
        ));

        info!(addr = %addr, identity = %self.identity, "Starting HTTP server");
        let router = build_router(Arc::clone(&self));
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServiceError::Serve);

        sweeper.abort();
        info!("Gateway stopped");
        result
    }
}
