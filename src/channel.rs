//! One connection between the host and the script engine.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{Instrument, debug, info, warn};

use crate::dispatch::{self, ExitCondition};
use crate::error::{ChannelError, ProtocolError, Result, TransportError};
use crate::handler::{HandlerError, ReturnOrException, SessionHandler};
use crate::handles::HandleTable;
use crate::message::types::{MAX_PAYLOAD_LEN, MessageType, SpecialDispatchId};
use crate::message::{
    FreeValueMessage, InvokeMessage, InvokeSpecialMessage, LoadModuleMessage, LoadScriptMessage,
    Message, ReturnMessage,
};
use crate::transport::TransportStats;
use crate::value::Value;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Configuration for a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest string, argument list or id list accepted from the peer
    pub max_payload_len: usize,
    /// Time allowed for the next complete message to arrive, in milliseconds (None waits forever)
    pub read_timeout_ms: Option<u64>,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_payload_len: MAX_PAYLOAD_LEN,
            read_timeout_ms: None,
            read_buffer_size: 8 * 1024,
            write_buffer_size: 8 * 1024,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Set read timeout
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Open,
    Terminated,
    Closed,
}

/// How a served session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The peer loaded a module and later quit.
    Completed,
    /// The handler refused the module; the peer was sent the reason as an exception.
    Rejected(HandlerError),
}

/// A bidirectional, re-entrant call channel over one byte stream.
///
/// Outbound calls block in [`invoke`](Self::invoke) until their `Return` arrives,
/// servicing any calls the peer makes in the meantime. Fire-and-forget messages are
/// buffered and written in the same flush as the next call or return.
pub struct Channel {
    reader: BufReader<BoxedReader>,
    writer: BufWriter<BoxedWriter>,
    outbound: BytesMut,
    handles: Arc<HandleTable>,
    config: ChannelConfig,
    remote: Option<SocketAddr>,
    state: ChannelState,
    pub(crate) stats: TransportStats,
}

impl Channel {
    pub fn new<R, W>(reader: R, writer: W, config: ChannelConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            reader: BufReader::with_capacity(config.read_buffer_size, reader),
            writer: BufWriter::with_capacity(config.write_buffer_size, writer),
            outbound: BytesMut::new(),
            handles: Arc::new(HandleTable::new()),
            config,
            remote: None,
            state: ChannelState::Open,
            stats: TransportStats::default(),
        }
    }

    pub(crate) fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Proxies for script objects received on this channel.
    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn is_terminated(&self) -> bool {
        self.state != ChannelState::Open
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    /// Call `dispatch_id` on the peer and wait for its answer.
    ///
    /// An exception thrown by the peer is a normal result with `is_exception` set.
    pub async fn invoke(
        &mut self,
        handler: &dyn SessionHandler,
        this: Value,
        dispatch_id: i32,
        args: Vec<Value>,
    ) -> Result<ReturnOrException> {
        let message = Message::Invoke(InvokeMessage {
            method_dispatch_id: dispatch_id,
            this,
            args,
        });
        let result = self.call(handler, message).await;
        self.check(handler, result)
    }

    /// Issue a privileged property access on the peer.
    ///
    /// Argument shape is checked locally; a bad shape is reported without
    /// touching the connection.
    pub async fn invoke_special(
        &mut self,
        handler: &dyn SessionHandler,
        dispatch_id: SpecialDispatchId,
        args: Vec<Value>,
    ) -> Result<ReturnOrException> {
        dispatch::validate_special(dispatch_id, &args)?;
        let message = Message::InvokeSpecial(InvokeSpecialMessage { dispatch_id, args });
        let result = self.call(handler, message).await;
        self.check(handler, result)
    }

    /// Ask the peer to load a module, and wait for it to accept or refuse.
    pub async fn load_module(
        &mut self,
        handler: &dyn SessionHandler,
        module_name: &str,
        user_agent: &str,
    ) -> Result<ReturnOrException> {
        let message = Message::LoadModule(LoadModuleMessage::new(module_name, user_agent));
        let result = self.call(handler, message).await;
        self.check(handler, result)
    }

    /// Queue script source for the peer to evaluate. Sent with the next call or return.
    pub fn load_script(&mut self, script: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.queue(&Message::LoadScript(LoadScriptMessage {
            script: script.into(),
        }));
        Ok(())
    }

    /// Queue a release notice for ids this side handed out. Sent with the next call or return.
    pub fn free_values(&mut self, ids: Vec<i32>) -> Result<()> {
        self.ensure_open()?;
        if !ids.is_empty() {
            self.queue(&Message::FreeValue(FreeValueMessage { ids }));
        }
        Ok(())
    }

    /// Service the peer's calls until it quits.
    pub async fn react_to_messages(&mut self, handler: &dyn SessionHandler) -> Result<()> {
        let result = dispatch::run(self, handler, ExitCondition::Quit).await;
        let result = self.check(handler, result);
        if result.is_ok() {
            self.terminate(handler, None);
        }
        result.map(|_| ())
    }

    /// Run a whole served session: module handshake, call loop, unload.
    ///
    /// The connection is closed when this returns.
    pub async fn serve(&mut self, handler: &dyn SessionHandler) -> Result<SessionOutcome> {
        let result = self.serve_session(handler).await;
        let result = self.check(handler, result);
        self.close().await;
        result
    }

    async fn serve_session(&mut self, handler: &dyn SessionHandler) -> Result<SessionOutcome> {
        let load = match self.read_message().await? {
            Message::LoadModule(load) => load,
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    message_type: other.message_type(),
                    context: "before LoadModule",
                }
                .into());
            }
        };
        info!(
            module = %load.module_name,
            user_agent = %load.user_agent,
            remote = ?self.remote,
            "loading module"
        );

        let span = match handler
            .load_module(self, &load.module_name, &load.user_agent)
            .await
        {
            Ok(span) => span,
            Err(err) => {
                warn!(module = %load.module_name, error = %err, "module rejected");
                self.send_return(ReturnOrException::from(err.clone())).await?;
                self.terminate(handler, None);
                return Ok(SessionOutcome::Rejected(err));
            }
        };

        self.send_return(ReturnOrException::undefined()).await?;
        self.react_to_messages(handler).instrument(span).await?;
        handler.unload_module(self, &load.module_name).await;
        info!(module = %load.module_name, "module unloaded");
        Ok(SessionOutcome::Completed)
    }

    /// Tell the peer this side is done, then close.
    pub async fn quit(&mut self) -> Result<()> {
        self.send(Message::Quit).await?;
        self.close().await;
        Ok(())
    }

    /// Shut the connection down. Safe to call more than once; errors are ignored.
    pub async fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        if let Err(err) = self.writer.shutdown().await {
            debug!(error = %err, "error while closing channel");
        }
        // Release both stream halves so the underlying socket is closed now.
        let reader: BoxedReader = Box::new(tokio::io::empty());
        let writer: BoxedWriter = Box::new(tokio::io::sink());
        self.reader = BufReader::new(reader);
        self.writer = BufWriter::new(writer);
        self.state = ChannelState::Closed;
    }

    async fn call(
        &mut self,
        handler: &dyn SessionHandler,
        message: Message,
    ) -> Result<ReturnOrException> {
        let msg_type = message.message_type();
        self.send(message).await?;
        match dispatch::run(self, handler, ExitCondition::Return).await? {
            Some(ret) => Ok(ReturnOrException {
                is_exception: ret.is_exception,
                value: ret.value,
            }),
            None => Err(ProtocolError::UnexpectedMessage {
                message_type: msg_type,
                context: "left without a return",
            }
            .into()),
        }
    }

    pub(crate) async fn send_return(&mut self, reply: ReturnOrException) -> Result<()> {
        self.send(Message::Return(ReturnMessage {
            is_exception: reply.is_exception,
            value: reply.value,
        }))
        .await
    }

    /// Write a message, preceded by any queued fire-and-forget messages, and flush.
    pub(crate) async fn send(&mut self, message: Message) -> Result<()> {
        self.ensure_open()?;
        if matches!(
            message.message_type(),
            MessageType::Invoke | MessageType::Return | MessageType::InvokeSpecial
        ) {
            self.queue_dead_handles();
        }
        self.queue(&message);
        self.flush_outbound().await
    }

    /// Flush pending output, then block for the next message.
    pub(crate) async fn read_message(&mut self) -> Result<Message> {
        self.ensure_open()?;
        self.flush_outbound().await?;

        let read = Message::decode(
            &mut self.reader,
            &*self.handles,
            self.config.max_payload_len,
        );
        let message = match self.config.read_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| TransportError::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                    operation: "waiting for message".to_string(),
                })??,
            None => read.await?,
        };

        self.stats.messages_received += 1;
        Ok(message)
    }

    fn queue_dead_handles(&mut self) {
        let dead = self.handles.collect_dead_handles();
        if dead.is_empty() {
            return;
        }
        let mut ids: Vec<i32> = dead.into_iter().collect();
        ids.sort_unstable();
        debug!(count = ids.len(), "releasing script objects");
        self.stats.handles_released += ids.len() as u64;
        self.queue(&Message::FreeValue(FreeValueMessage { ids }));
    }

    fn queue(&mut self, message: &Message) {
        message.encode(&mut self.outbound);
        self.stats.messages_sent += 1;
    }

    async fn flush_outbound(&mut self) -> Result<()> {
        if !self.outbound.is_empty() {
            let bytes = self.outbound.split();
            self.stats.bytes_sent += bytes.len() as u64;
            self.writer.write_all(&bytes).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ChannelState::Open => Ok(()),
            _ => Err(ChannelError::Terminated),
        }
    }

    /// Mark the channel terminated on a fatal error.
    fn check<T>(&mut self, handler: &dyn SessionHandler, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.terminate(handler, Some(err));
            }
        }
        result
    }

    fn terminate(&mut self, handler: &dyn SessionHandler, cause: Option<&ChannelError>) {
        if self.state != ChannelState::Open {
            return;
        }
        self.state = ChannelState::Terminated;
        match cause {
            Some(err) => warn!(error = %err, remote = ?self.remote, "remote session ended"),
            None => debug!(remote = ?self.remote, "remote session ended"),
        }
        handler.session_ended(cause);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("handles", &self.handles)
            .finish()
    }
}
