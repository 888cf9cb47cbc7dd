//! A host and a script engine talking over TCP.
//!
//! The host serves one session. The script side loads a module, calls the host,
//! and the host calls back into the script side before answering.
//!
//! Run with `RUST_LOG=debug cargo run --example echo_session` to see the traffic.

use async_trait::async_trait;
use oophm_channel::{
    Channel, ChannelListener, HandlerError, HandlerResult, ReturnOrException, SessionHandler,
    SpecialDispatchId, TcpConfig, Value, connect,
};
use tracing::{Span, info};
use tracing_subscriber::EnvFilter;

const ECHO: i32 = 1;
const GREET: i32 = 2;
const WINDOW: i32 = 0;
const TITLE: i32 = 5;

struct Host;

#[async_trait]
impl SessionHandler for Host {
    async fn invoke(
        &self,
        channel: &mut Channel,
        _this: Value,
        dispatch_id: i32,
        args: Vec<Value>,
    ) -> HandlerResult<ReturnOrException> {
        match dispatch_id {
            ECHO => Ok(ReturnOrException::value(
                args.into_iter().next().unwrap_or_default(),
            )),
            GREET => {
                // Ask the script side for a property while its call is still pending.
                let title = channel
                    .invoke_special(
                        self,
                        SpecialDispatchId::GetProperty,
                        vec![Value::Int(WINDOW), Value::Int(TITLE)],
                    )
                    .await
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                Ok(ReturnOrException::value(format!("hello, {}", title.value)))
            }
            other => Err(HandlerError::new(format!("no method {}", other))),
        }
    }

    async fn get_property(
        &self,
        _channel: &mut Channel,
        _ref_id: i32,
        prop_id: i32,
    ) -> HandlerResult<ReturnOrException> {
        Err(HandlerError::new(format!("no property {}", prop_id)))
    }

    async fn set_property(
        &self,
        _channel: &mut Channel,
        _ref_id: i32,
        prop_id: i32,
        _value: Value,
    ) -> HandlerResult<ReturnOrException> {
        Err(HandlerError::new(format!("property {} is read-only", prop_id)))
    }

    async fn free_values(&self, _channel: &mut Channel, ids: &[i32]) {
        info!(?ids, "script side released host objects");
    }

    async fn load_module(
        &self,
        _channel: &mut Channel,
        module_name: &str,
        user_agent: &str,
    ) -> HandlerResult<Span> {
        info!(module_name, user_agent, "module requested");
        Ok(tracing::info_span!("module", name = module_name))
    }

    async fn unload_module(&self, _channel: &mut Channel, module_name: &str) {
        info!(module_name, "module finished");
    }
}

struct Script;

#[async_trait]
impl SessionHandler for Script {
    async fn invoke(
        &self,
        _channel: &mut Channel,
        _this: Value,
        dispatch_id: i32,
        _args: Vec<Value>,
    ) -> HandlerResult<ReturnOrException> {
        Err(HandlerError::new(format!("no function {}", dispatch_id)))
    }

    async fn get_property(
        &self,
        _channel: &mut Channel,
        ref_id: i32,
        prop_id: i32,
    ) -> HandlerResult<ReturnOrException> {
        match (ref_id, prop_id) {
            (WINDOW, TITLE) => Ok(ReturnOrException::value("demo page")),
            _ => Ok(ReturnOrException::undefined()),
        }
    }

    async fn set_property(
        &self,
        _channel: &mut Channel,
        _ref_id: i32,
        _prop_id: i32,
        _value: Value,
    ) -> HandlerResult<ReturnOrException> {
        Ok(ReturnOrException::undefined())
    }

    async fn free_values(&self, _channel: &mut Channel, _ids: &[i32]) {}

    async fn load_module(
        &self,
        _channel: &mut Channel,
        _module_name: &str,
        _user_agent: &str,
    ) -> HandlerResult<Span> {
        Err(HandlerError::new("the script side does not load modules"))
    }

    async fn unload_module(&self, _channel: &mut Channel, _module_name: &str) {}

    async fn load_script(&self, _channel: &mut Channel, script: &str) -> HandlerResult<()> {
        info!(script, "evaluating script");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let listener = ChannelListener::bind("127.0.0.1:0".parse()?, TcpConfig::default()).await?;
    let addr = listener.local_addr()?;
    println!("Host listening on {}", addr);

    let host = tokio::spawn(async move {
        let mut channel = listener.accept().await?;
        let outcome = channel.serve(&Host).await?;
        Ok::<_, oophm_channel::ChannelError>((outcome, channel.stats()))
    });

    let mut channel = connect(addr, TcpConfig::default()).await?;
    let loaded = channel.load_module(&Script, "demo", "echo-demo/1.0").await?;
    println!("load_module -> exception={}", loaded.is_exception);

    let echoed = channel
        .invoke(&Script, Value::Null, ECHO, vec![Value::from("ping")])
        .await?;
    println!("echo -> {}", echoed.value);

    let greeting = channel.invoke(&Script, Value::Null, GREET, vec![]).await?;
    println!("greet -> {}", greeting.value);

    let missing = channel.invoke(&Script, Value::Null, 42, vec![]).await?;
    println!("missing -> exception={} {}", missing.is_exception, missing.value);

    channel.quit().await?;
    let (outcome, host_stats) = host.await??;
    println!("session outcome: {:?}", outcome);

    let mut total = channel.stats();
    total.merge(&host_stats);
    print!("{}", total);
    Ok(())
}
