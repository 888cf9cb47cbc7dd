use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::channel::{Channel, ChannelConfig};
use crate::error::{TransportError, TransportResult};

/// Configuration for TCP channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub nodelay: bool,
    pub channel: ChannelConfig,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            nodelay: true,
            channel: ChannelConfig::default(),
        }
    }
}

impl TcpConfig {
    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_channel_config(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Channel {
    /// Wrap an already connected socket.
    pub fn from_tcp(stream: TcpStream, config: &TcpConfig) -> TransportResult<Self> {
        // Every call is a small write followed by a blocking read.
        if config.nodelay {
            stream.set_nodelay(true).map_err(|e| TransportError::ConnectionFailed {
                addr: "tcp stream".to_string(),
                reason: format!("Failed to set TCP_NODELAY: {}", e),
            })?;
        }

        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Channel::new(reader, writer, config.channel.clone()).with_remote(peer_addr))
    }
}

/// Connect to a listening peer.
pub async fn connect(addr: SocketAddr, config: TcpConfig) -> TransportResult<Channel> {
    let timeout = config.connect_timeout();
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout {
            duration_ms: timeout.as_millis() as u64,
            operation: format!("connecting to {}", addr),
        })?
        .map_err(|e| TransportError::ConnectionFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    debug!(%addr, "channel connected");
    Channel::from_tcp(stream, &config)
}

/// Accepts incoming channel connections, one session per socket.
pub struct ChannelListener {
    listener: TcpListener,
    config: TcpConfig,
}

impl ChannelListener {
    pub async fn bind(addr: SocketAddr, config: TcpConfig) -> TransportResult<Self> {
        let listener =
            TcpListener::bind(addr)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    addr: addr.to_string(),
                    reason: format!("Failed to bind: {}", e),
                })?;

        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> TransportResult<Channel> {
        let (stream, addr) = self.listener.accept().await?;
        debug!(%addr, "accepted channel connection");
        Channel::from_tcp(stream, &self.config)
    }
}
