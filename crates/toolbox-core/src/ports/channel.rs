//! Channel port - the shared connection to the field device.
//!
//! The orchestrator owns the only `Channel` of a run. Scripts never open or
//! close it directly; they go through the lifecycle barrier, which calls
//! `connect` and `disconnect` exactly once each.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Something that happened on the channel.
///
/// Frames are passed through as raw bytes; decoding them is the job of the
/// protocol layer the scripts use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(Vec<u8>),
    StateChanged(ConnectionState),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,

    #[error("channel handshake failed: {0}")]
    Handshake(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("channel i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Short human-readable description, used in logs.
    fn describe(&self) -> String;

    /// Open the connection. Resolves once it is ready for traffic.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Close the connection. Resolves once teardown finished.
    async fn disconnect(&self) -> Result<(), ChannelError>;

    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError>;

    /// Subscribe to frames and state changes from now on.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}
