pub mod types;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use self::types::{MessageType, PROTOCOL_VERSION, SpecialDispatchId};
use crate::codec::{ObjectResolver, read_length, read_untagged_string, read_value};
use crate::codec::{write_untagged_string, write_value};
use crate::error::{ProtocolError, Result};
use crate::value::Value;

/// Call a method on the other side by dispatch id.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeMessage {
    pub method_dispatch_id: i32,
    pub this: Value,
    pub args: Vec<Value>,
}

/// Privileged channel-internal call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeSpecialMessage {
    pub dispatch_id: SpecialDispatchId,
    pub args: Vec<Value>,
}

/// Result of a previous invoke.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMessage {
    pub is_exception: bool,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadModuleMessage {
    pub protocol_version: i32,
    pub module_name: String,
    pub user_agent: String,
}

/// Script source for the script side to evaluate. Has no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadScriptMessage {
    pub script: String,
}

/// Ids the sender no longer references. Has no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeValueMessage {
    pub ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Invoke(InvokeMessage),
    Return(ReturnMessage),
    LoadModule(LoadModuleMessage),
    Quit,
    LoadScript(LoadScriptMessage),
    InvokeSpecial(InvokeSpecialMessage),
    FreeValue(FreeValueMessage),
}

impl LoadModuleMessage {
    pub fn new(module_name: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            module_name: module_name.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Invoke(_) => MessageType::Invoke,
            Message::Return(_) => MessageType::Return,
            Message::LoadModule(_) => MessageType::LoadModule,
            Message::Quit => MessageType::Quit,
            Message::LoadScript(_) => MessageType::LoadJsni,
            Message::InvokeSpecial(_) => MessageType::InvokeSpecial,
            Message::FreeValue(_) => MessageType::FreeValue,
        }
    }

    pub fn is_asynchronous(&self) -> bool {
        self.message_type().is_asynchronous()
    }

    /// Append the message type tag and payload to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.message_type().to_u8());
        match self {
            Message::Invoke(msg) => {
                buf.put_i32(msg.method_dispatch_id);
                write_value(buf, &msg.this);
                write_values(buf, &msg.args);
            }
            Message::Return(msg) => {
                buf.put_u8(msg.is_exception as u8);
                write_value(buf, &msg.value);
            }
            Message::LoadModule(msg) => {
                buf.put_i32(msg.protocol_version);
                write_untagged_string(buf, &msg.module_name);
                write_untagged_string(buf, &msg.user_agent);
            }
            Message::Quit => {}
            Message::LoadScript(msg) => write_untagged_string(buf, &msg.script),
            Message::InvokeSpecial(msg) => {
                buf.put_u8(msg.dispatch_id.to_u8());
                write_values(buf, &msg.args);
            }
            Message::FreeValue(msg) => {
                buf.put_i32(msg.ids.len() as i32);
                for id in &msg.ids {
                    buf.put_i32(*id);
                }
            }
        }
    }

    /// Read a message type tag.
    pub async fn read_type<R>(reader: &mut R) -> Result<MessageType>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let tag = reader.read_u8().await?;
        Ok(MessageType::from_u8(tag)?)
    }

    /// Read the payload of a message whose tag has already been consumed.
    pub async fn decode_body<R>(
        msg_type: MessageType,
        reader: &mut R,
        resolver: &dyn ObjectResolver,
        max_len: usize,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let message = match msg_type {
            MessageType::Invoke => {
                let method_dispatch_id = reader.read_i32().await?;
                let this = read_value(reader, resolver, max_len).await?;
                let args = read_values(reader, resolver, max_len).await?;
                Message::Invoke(InvokeMessage {
                    method_dispatch_id,
                    this,
                    args,
                })
            }
            MessageType::Return => {
                let is_exception = reader.read_u8().await? != 0;
                let value = read_value(reader, resolver, max_len).await?;
                Message::Return(ReturnMessage {
                    is_exception,
                    value,
                })
            }
            MessageType::LoadModule => {
                let protocol_version = reader.read_i32().await?;
                if protocol_version != PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        actual: protocol_version,
                    }
                    .into());
                }
                let module_name = read_untagged_string(reader, max_len).await?;
                let user_agent = read_untagged_string(reader, max_len).await?;
                Message::LoadModule(LoadModuleMessage {
                    protocol_version,
                    module_name,
                    user_agent,
                })
            }
            MessageType::Quit => Message::Quit,
            MessageType::LoadJsni => Message::LoadScript(LoadScriptMessage {
                script: read_untagged_string(reader, max_len).await?,
            }),
            MessageType::InvokeSpecial => {
                let dispatch_id = SpecialDispatchId::from_u8(reader.read_u8().await?)?;
                let args = read_values(reader, resolver, max_len).await?;
                Message::InvokeSpecial(InvokeSpecialMessage { dispatch_id, args })
            }
            MessageType::FreeValue => {
                let count = read_length(reader, max_len).await?;
                let mut ids = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    ids.push(reader.read_i32().await?);
                }
                Message::FreeValue(FreeValueMessage { ids })
            }
        };
        Ok(message)
    }

    /// Read a complete message, tag included.
    pub async fn decode<R>(
        reader: &mut R,
        resolver: &dyn ObjectResolver,
        max_len: usize,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let msg_type = Self::read_type(reader).await?;
        Self::decode_body(msg_type, reader, resolver, max_len).await
    }
}

fn write_values(buf: &mut BytesMut, values: &[Value]) {
    buf.put_i32(values.len() as i32);
    for value in values {
        write_value(buf, value);
    }
}

async fn read_values<R>(
    reader: &mut R,
    resolver: &dyn ObjectResolver,
    max_len: usize,
) -> Result<Vec<Value>>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let count = read_length(reader, max_len).await?;
    let mut values = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        values.push(read_value(reader, resolver, max_len).await?);
    }
    Ok(values)
}
