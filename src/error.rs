use thiserror::Error;

use crate::message::types::{MessageType, SpecialDispatchId};
use crate::value::ValueType;

/// Malformed or out-of-range bytes on the wire. Always fatal for the connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid message type {0}")]
    InvalidMessageType(u8),

    #[error("Invalid value type {0}")]
    InvalidValueType(u8),

    #[error("Invalid object id {0}")]
    InvalidObjectId(i32),

    #[error("Invalid special dispatch id {0}")]
    InvalidSpecialDispatchId(u8),

    #[error("Incompatible client version: server={expected}, client={actual}")]
    VersionMismatch { expected: i32, actual: i32 },

    #[error("{operation:?} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        operation: SpecialDispatchId,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid argument for {operation:?}: {reason}")]
    InvalidArgument {
        operation: SpecialDispatchId,
        reason: String,
    },

    #[error("Special dispatch {0:?} is no longer supported")]
    DeprecatedDispatch(SpecialDispatchId),

    #[error("Unexpected {message_type:?} message {context}")]
    UnexpectedMessage {
        message_type: MessageType,
        context: &'static str,
    },

    #[error("Length {length} out of range (max: {max})")]
    LengthOutOfRange { length: i64, max: usize },

    #[error("Invalid UTF-8 string on the wire")]
    InvalidUtf8,
}

/// Failure of the underlying byte stream.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("Timeout after {duration_ms}ms during {operation}")]
    Timeout { duration_ms: u64, operation: String },
}

/// A value did not have the shape the caller asked for.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("Expected {expected}, found {actual:?}")]
    TypeMismatch {
        expected: &'static str,
        actual: ValueType,
    },
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Channel terminated")]
    Terminated,
}

impl ChannelError {
    /// Whether this error tears down the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::Value(_))
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Transport(TransportError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;
