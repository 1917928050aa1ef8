//! VirtualChannel - in-process loopback channel.
//!
//! Every frame sent while connected is delivered back to all subscribers,
//! so scripts can talk to each other (e.g. a simulator feeding a logger)
//! without any hardware attached.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::ports::{Channel, ChannelError, ChannelEvent, ConnectionState};

const EVENT_CAPACITY: usize = 1024;

pub struct VirtualChannel {
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ChannelEvent>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl VirtualChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// How many times `connect` was called.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// How many times `disconnect` was called.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
        // ignore send error: nobody may be subscribed
        let _ = self.events.send(ChannelEvent::StateChanged(next));
    }
}

impl Default for VirtualChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for VirtualChannel {
    fn describe(&self) -> String {
        "virtual loopback".to_string()
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        if self.state() != ConnectionState::Connected {
            return Err(ChannelError::NotConnected);
        }
        let _ = self.events.send(ChannelEvent::Frame(frame.to_vec()));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}
