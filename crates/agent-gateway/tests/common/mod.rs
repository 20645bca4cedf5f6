//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use agent_crypto::AgentKeypair;
use agent_gateway::endpoint::{EndpointDefinition, ParamSchema, ParamSpec};
use agent_gateway::{
    AgentModule, Gateway, GatewayConfig, RequestEnvelope, StaticChainClient, TimeSource,
};
use chrono::{DateTime, TimeZone, Utc};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

/// Wall clock the test moves by hand.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Module exercising every dispatcher outcome.
pub struct TestModule;

impl AgentModule for TestModule {
    fn endpoints() -> Vec<EndpointDefinition<Self>> {
        vec![
            EndpointDefinition::sync_fn("ping", ParamSchema::empty(), |_: &TestModule, _| {
                Ok("pong")
            }),
            EndpointDefinition::async_fn(
                "greet",
                ParamSchema::empty()
                    .param(ParamSpec::string("name").min_length(1))
                    .param(ParamSpec::integer("times").default(1).min(1.0).max(3.0)),
                |_: Arc<TestModule>, params| async move {
                    let name: String = params.get("name")?;
                    let times: usize = params.get("times")?;
                    Ok(vec![format!("hello {name}"); times])
                },
            ),
            EndpointDefinition::sync_fn("explode", ParamSchema::empty(), |_: &TestModule, _| {
                Err::<(), _>(anyhow::anyhow!("connection string postgres://admin:hunter2@db"))
            }),
        ]
    }
}

pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub server: AgentKeypair,
    pub chain: Arc<StaticChainClient>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: GatewayConfig) -> Self {
        let server = AgentKeypair::from_seed([0xAA; 32]);
        let chain = Arc::new(StaticChainClient::new());
        let clock = Arc::new(ManualClock::new());
        let gateway = Gateway::with_time_source(
            config,
            server.address(),
            TestModule,
            chain.clone(),
            clock.clone(),
        )
        .expect("valid gateway config");
        Self {
            gateway: Arc::new(gateway),
            server,
            chain,
            clock,
        }
    }

    /// Envelope signed now (by the manual clock) for this server.
    pub fn envelope(&self, caller: &AgentKeypair, endpoint: &str, payload: &str) -> RequestEnvelope {
        RequestEnvelope::sign(
            caller,
            self.server.address(),
            self.clock.now(),
            endpoint,
            payload.as_bytes().to_vec(),
        )
    }
}

pub fn caller(seed: u8) -> AgentKeypair {
    AgentKeypair::from_seed([seed; 32])
}
