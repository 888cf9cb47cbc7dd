use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::Span;

use crate::channel::{Channel, ChannelConfig};
use crate::error::ChannelError;
use crate::handler::{HandlerError, HandlerResult, ReturnOrException, SessionHandler};
use crate::value::Value;

/// Dispatch id that doubles its first argument.
pub const DOUBLE: i32 = 3;
/// Dispatch id that always fails in the handler.
pub const FAIL: i32 = 99;

/// A connected pair of in-memory channels.
pub fn channel_pair() -> (Channel, Channel) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    (
        Channel::new(a_read, a_write, ChannelConfig::default()),
        Channel::new(b_read, b_write, ChannelConfig::default()),
    )
}

/// Handler that records everything and answers a few fixed dispatch ids.
#[derive(Default)]
pub struct RecordingHandler {
    pub invokes: Mutex<Vec<(i32, Value, Vec<Value>)>>,
    pub freed: Mutex<Vec<i32>>,
    pub properties: Mutex<HashMap<(i32, i32), Value>>,
    pub scripts: Mutex<Vec<String>>,
    pub modules: Mutex<Vec<String>>,
    pub unloaded: Mutex<Vec<String>>,
    pub ended: Mutex<Vec<Option<String>>>,
    pub accept_scripts: bool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_side() -> Self {
        Self {
            accept_scripts: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SessionHandler for RecordingHandler {
    async fn invoke(
        &self,
        _channel: &mut Channel,
        this: Value,
        dispatch_id: i32,
        args: Vec<Value>,
    ) -> HandlerResult<ReturnOrException> {
        self.invokes.lock().push((dispatch_id, this, args.clone()));
        match dispatch_id {
            DOUBLE => {
                let n = args
                    .first()
                    .ok_or_else(|| HandlerError::new("missing argument"))?
                    .to_i32()
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                Ok(ReturnOrException::value(n * 2))
            }
            FAIL => Err(HandlerError::new("handler failed")),
            _ => Ok(ReturnOrException::undefined()),
        }
    }

    async fn get_property(
        &self,
        _channel: &mut Channel,
        ref_id: i32,
        prop_id: i32,
    ) -> HandlerResult<ReturnOrException> {
        match self.properties.lock().get(&(ref_id, prop_id)) {
            Some(value) => Ok(ReturnOrException::value(value.clone())),
            None => Err(HandlerError::new(format!("no property {}", prop_id))),
        }
    }

    async fn set_property(
        &self,
        _channel: &mut Channel,
        ref_id: i32,
        prop_id: i32,
        value: Value,
    ) -> HandlerResult<ReturnOrException> {
        self.properties.lock().insert((ref_id, prop_id), value);
        Ok(ReturnOrException::undefined())
    }

    async fn free_values(&self, _channel: &mut Channel, ids: &[i32]) {
        self.freed.lock().extend_from_slice(ids);
    }

    async fn load_module(
        &self,
        _channel: &mut Channel,
        module_name: &str,
        _user_agent: &str,
    ) -> HandlerResult<Span> {
        if module_name == "reject" {
            return Err(HandlerError::new("module not found"));
        }
        self.modules.lock().push(module_name.to_string());
        Ok(tracing::info_span!("module", name = module_name))
    }

    async fn unload_module(&self, _channel: &mut Channel, module_name: &str) {
        self.unloaded.lock().push(module_name.to_string());
    }

    async fn load_script(&self, _channel: &mut Channel, script: &str) -> HandlerResult<()> {
        if !self.accept_scripts {
            return Err(HandlerError::new("scripts not accepted"));
        }
        self.scripts.lock().push(script.to_string());
        Ok(())
    }

    fn session_ended(&self, cause: Option<&ChannelError>) {
        self.ended.lock().push(cause.map(|e| e.to_string()));
    }
}
