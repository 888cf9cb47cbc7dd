//! The message state machine shared by the serving loop and blocked callers.

use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::error::{ProtocolError, Result};
use crate::handler::{ReturnOrException, SessionHandler};
use crate::message::types::{MessageType, SpecialDispatchId};
use crate::message::{InvokeSpecialMessage, Message, ReturnMessage};
use crate::value::Value;

/// What ends a run of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCondition {
    /// Serving: run until the peer sends `Quit`. A `Return` is a protocol error.
    Quit,
    /// Blocked caller: run until the answer arrives. A `Quit` is a protocol error.
    Return,
}

impl ExitCondition {
    fn context(self) -> &'static str {
        match self {
            ExitCondition::Quit => "while serving",
            ExitCondition::Return => "while waiting for a return",
        }
    }
}

/// Read and service messages until `exit` is met.
///
/// Returns the awaited `Return` in [`ExitCondition::Return`] mode and `None` once
/// the peer quits in [`ExitCondition::Quit`] mode. Inbound calls received in either
/// mode are answered before the next read.
pub async fn run(
    channel: &mut Channel,
    handler: &dyn SessionHandler,
    exit: ExitCondition,
) -> Result<Option<ReturnMessage>> {
    loop {
        let message = channel.read_message().await?;
        trace!(message_type = ?message.message_type(), ?exit, "received message");

        match message {
            Message::FreeValue(msg) => {
                debug!(count = msg.ids.len(), "peer released host objects");
                handler.free_values(channel, &msg.ids).await;
            }
            Message::Invoke(msg) => {
                if exit == ExitCondition::Return {
                    channel.stats.reentrant_calls += 1;
                }
                let reply = handler
                    .invoke(channel, msg.this, msg.method_dispatch_id, msg.args)
                    .await
                    .unwrap_or_else(ReturnOrException::from);
                channel.send_return(reply).await?;
            }
            Message::InvokeSpecial(msg) => {
                let reply = invoke_special(channel, handler, msg).await?;
                channel.send_return(reply).await?;
            }
            Message::LoadScript(msg) => {
                if let Err(err) = handler.load_script(channel, &msg.script).await {
                    warn!(error = %err, "script load rejected");
                    return Err(ProtocolError::UnexpectedMessage {
                        message_type: MessageType::LoadJsni,
                        context: exit.context(),
                    }
                    .into());
                }
            }
            Message::Return(msg) if exit == ExitCondition::Return => return Ok(Some(msg)),
            Message::Quit if exit == ExitCondition::Quit => return Ok(None),
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    message_type: other.message_type(),
                    context: exit.context(),
                }
                .into());
            }
        }
    }
}

/// Check the argument shape of a special dispatch before anything is called.
pub(crate) fn validate_special(operation: SpecialDispatchId, args: &[Value]) -> Result<()> {
    let expected = operation
        .arg_count()
        .ok_or(ProtocolError::DeprecatedDispatch(operation))?;
    if args.len() != expected {
        return Err(ProtocolError::ArgumentCount {
            operation,
            expected,
            actual: args.len(),
        }
        .into());
    }
    Ok(())
}

fn int_arg(operation: SpecialDispatchId, value: &Value) -> Result<i32> {
    value.as_i32().map_err(|err| {
        ProtocolError::InvalidArgument {
            operation,
            reason: err.to_string(),
        }
        .into()
    })
}

async fn invoke_special(
    channel: &mut Channel,
    handler: &dyn SessionHandler,
    msg: InvokeSpecialMessage,
) -> Result<ReturnOrException> {
    let operation = msg.dispatch_id;
    validate_special(operation, &msg.args)?;

    let mut args = msg.args.into_iter();
    let ref_id = int_arg(operation, &args.next().unwrap_or_default())?;
    let prop_id = int_arg(operation, &args.next().unwrap_or_default())?;

    let reply = match operation {
        SpecialDispatchId::GetProperty => handler.get_property(channel, ref_id, prop_id).await,
        SpecialDispatchId::SetProperty => {
            let value = args.next().unwrap_or_default();
            handler.set_property(channel, ref_id, prop_id, value).await
        }
        SpecialDispatchId::HasMethod | SpecialDispatchId::HasProperty => {
            return Err(ProtocolError::DeprecatedDispatch(operation).into());
        }
    };
    Ok(reply.unwrap_or_else(ReturnOrException::from))
}
