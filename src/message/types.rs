use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Version sent once per connection inside `LoadModule`.
pub const PROTOCOL_VERSION: i32 = 1;

/// Object id the special dispatches address on the host side.
pub const SPECIAL_SERVER_METHODS_OBJECT: i32 = 0;
/// Object id the special dispatches address on the script side.
pub const SPECIAL_CLIENT_METHODS_OBJECT: i32 = 0;

pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Invoke = 0,
    Return = 1,
    LoadModule = 2,
    Quit = 3,
    /// Script source to evaluate on the script side.
    LoadJsni = 4,
    InvokeSpecial = 5,
    FreeValue = 6,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageType::Invoke),
            1 => Ok(MessageType::Return),
            2 => Ok(MessageType::LoadModule),
            3 => Ok(MessageType::Quit),
            4 => Ok(MessageType::LoadJsni),
            5 => Ok(MessageType::InvokeSpecial),
            6 => Ok(MessageType::FreeValue),
            _ => Err(ProtocolError::InvalidMessageType(value)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Fire-and-forget kinds have no reply and are never awaited.
    pub fn is_asynchronous(self) -> bool {
        matches!(self, MessageType::FreeValue | MessageType::LoadJsni)
    }
}

/// Privileged operations on the well-known methods object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SpecialDispatchId {
    /// Kept for stream compatibility; rejected when dispatched.
    HasMethod = 0,
    /// Kept for stream compatibility; rejected when dispatched.
    HasProperty = 1,
    GetProperty = 2,
    SetProperty = 3,
}

impl SpecialDispatchId {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(SpecialDispatchId::HasMethod),
            1 => Ok(SpecialDispatchId::HasProperty),
            2 => Ok(SpecialDispatchId::GetProperty),
            3 => Ok(SpecialDispatchId::SetProperty),
            _ => Err(ProtocolError::InvalidSpecialDispatchId(value)),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Number of arguments the operation takes, `None` for the deprecated ids.
    pub fn arg_count(self) -> Option<usize> {
        match self {
            SpecialDispatchId::GetProperty => Some(2),
            SpecialDispatchId::SetProperty => Some(3),
            SpecialDispatchId::HasMethod | SpecialDispatchId::HasProperty => None,
        }
    }
}
