use async_trait::async_trait;
use thiserror::Error;
use tracing::Span;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::value::Value;

/// A return value or thrown exception, as carried by a `Return` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnOrException {
    pub is_exception: bool,
    pub value: Value,
}

impl ReturnOrException {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            is_exception: false,
            value: value.into(),
        }
    }

    pub fn exception(value: impl Into<Value>) -> Self {
        Self {
            is_exception: true,
            value: value.into(),
        }
    }

    /// A void return.
    pub fn undefined() -> Self {
        Self::value(Value::Undefined)
    }

    pub fn into_result(self) -> std::result::Result<Value, Value> {
        if self.is_exception {
            Err(self.value)
        } else {
            Ok(self.value)
        }
    }
}

/// Raised by a handler when it cannot service a request.
///
/// The channel answers the request with an exception carrying the message
/// instead of tearing the connection down.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<HandlerError> for ReturnOrException {
    fn from(err: HandlerError) -> Self {
        ReturnOrException::exception(Value::String(err.message))
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Application hooks driven by the dispatch loop.
///
/// Each hook receives the channel so it can call back into the peer while the
/// peer is blocked waiting for this side's answer.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn invoke(
        &self,
        channel: &mut Channel,
        this: Value,
        dispatch_id: i32,
        args: Vec<Value>,
    ) -> HandlerResult<ReturnOrException>;

    async fn get_property(
        &self,
        channel: &mut Channel,
        ref_id: i32,
        prop_id: i32,
    ) -> HandlerResult<ReturnOrException>;

    async fn set_property(
        &self,
        channel: &mut Channel,
        ref_id: i32,
        prop_id: i32,
        value: Value,
    ) -> HandlerResult<ReturnOrException>;

    /// The peer no longer references these ids.
    async fn free_values(&self, channel: &mut Channel, ids: &[i32]);

    /// Accept or reject a module. The returned span scopes the session's logging.
    async fn load_module(
        &self,
        channel: &mut Channel,
        module_name: &str,
        user_agent: &str,
    ) -> HandlerResult<Span>;

    async fn unload_module(&self, channel: &mut Channel, module_name: &str);

    /// Evaluate pushed script source. Only the script side accepts these.
    async fn load_script(&self, _channel: &mut Channel, _script: &str) -> HandlerResult<()> {
        Err(HandlerError::new("this side does not evaluate scripts"))
    }

    /// Called once when the connection terminates; `cause` is `None` after a clean quit.
    fn session_ended(&self, _cause: Option<&ChannelError>) {}
}
