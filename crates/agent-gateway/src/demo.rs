//! Demo module served by the `agent-gateway` binary.

use crate::endpoint::{AgentModule, EndpointDefinition, ParamSchema, ParamSpec, Params};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct DemoModule {
    echoes: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct ThingResult {
    pub msg: String,
}

#[derive(Debug, Serialize)]
pub struct EchoResult {
    pub message: String,
    /// Echo calls served by this instance, this one included
    pub count: u64,
}

impl DemoModule {
    fn do_the_thing(&self, params: Params) -> anyhow::Result<ThingResult> {
        let awesomness: i64 = params.get("awesomness")?;
        let msg = if awesomness > 60 {
            format!("You're super awesome: {awesomness} awesomness")
        } else {
            format!("You're not that awesome: {awesomness} awesomness")
        };
        Ok(ThingResult { msg })
    }

    async fn echo(self: Arc<Self>, params: Params) -> anyhow::Result<EchoResult> {
        let message: String = params.get("message")?;
        tokio::task::yield_now().await;
        let count = self.echoes.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(EchoResult { message, count })
    }
}

impl AgentModule for DemoModule {
    fn endpoints() -> Vec<EndpointDefinition<Self>> {
        vec![
            EndpointDefinition::sync_fn("ping", ParamSchema::empty(), |_: &DemoModule, _| {
                Ok("pong")
            }),
            EndpointDefinition::sync_fn(
                "do_the_thing",
                ParamSchema::empty().param(ParamSpec::integer("awesomness").default(43)),
                DemoModule::do_the_thing,
            ),
            EndpointDefinition::async_fn(
                "echo",
                ParamSchema::empty().param(
                    ParamSpec::string("message")
                        .min_length(1)
                        .max_length(256),
                ),
                DemoModule::echo,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Dispatch, Dispatcher};
    use serde_json::json;

    #[tokio::test]
    async fn test_demo_endpoints() {
        let d = Dispatcher::new(DemoModule::default()).unwrap();

        assert_eq!(d.dispatch("ping", b"{}").await.unwrap(), json!("pong"));
        assert_eq!(
            d.dispatch("do_the_thing", b"{}").await.unwrap(),
            json!({"msg": "You're not that awesome: 43 awesomness"})
        );
        assert_eq!(
            d.dispatch("do_the_thing", br#"{"params":{"awesomness":61}}"#)
                .await
                .unwrap(),
            json!({"msg": "You're super awesome: 61 awesomness"})
        );

        let out = d
            .dispatch("echo", br#"{"params":{"message":"hi"}}"#)
            .await
            .unwrap();
        assert_eq!(out, json!({"message": "hi", "count": 1}));
        assert!(d.dispatch("echo", br#"{"params":{"message":""}}"#).await.is_err());
    }
}
