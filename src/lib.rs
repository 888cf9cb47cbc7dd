//! oophm-channel - re-entrant call channel between a development host and a browser script engine
pub mod channel;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod handles;
pub mod message;
pub mod transport;
pub mod value;

pub use channel::{Channel, ChannelConfig, SessionOutcome};
pub use error::{ChannelError, ProtocolError, Result, TransportError, TransportResult, ValueError};
pub use handler::{HandlerError, HandlerResult, ReturnOrException, SessionHandler};
pub use handles::HandleTable;
pub use message::Message;
pub use message::types::{MessageType, PROTOCOL_VERSION, SpecialDispatchId};
pub use transport::TransportStats;
pub use transport::tcp::{ChannelListener, TcpConfig, connect};
pub use value::{HostObjectRef, ScriptObjectRef, Value, ValueType};

#[cfg(test)]
pub(crate) mod test_support;
