//! TcpChannel - raw byte stream to a LAN adapter.
//!
//! Connect performs the adapter's line-based handshake and then switches to
//! data mode:
//! 1. wait for the `+HELLO` greeting
//! 2. `CONNECT <via tag>` (optional, remote access only)
//! 3. `PASS <password>` (optional)
//! 4. `CHANNEL <n>` (optional, multi-channel adapters)
//! 5. `DATA`
//!
//! Every reply must start with `+`. After `DATA` all received bytes are
//! broadcast as `ChannelEvent::Frame` chunks without interpretation.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::config::TcpOptions;
use crate::ports::{Channel, ChannelError, ChannelEvent, ConnectionState};

const EVENT_CAPACITY: usize = 1024;
const READ_CHUNK: usize = 4096;

pub struct TcpChannel {
    options: TcpOptions,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ChannelEvent>,
}

impl TcpChannel {
    pub fn new(options: TcpOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options,
            writer: Mutex::new(None),
            reader: StdMutex::new(None),
            events,
        }
    }

    fn emit(&self, state: ConnectionState) {
        let _ = self.events.send(ChannelEvent::StateChanged(state));
    }

    async fn handshake(
        &self,
        read: &mut BufReader<OwnedReadHalf>,
        write: &mut OwnedWriteHalf,
    ) -> Result<(), ChannelError> {
        expect_ok(read).await?;
        if let Some(via_tag) = &self.options.via_tag {
            command(read, write, &format!("CONNECT {via_tag}")).await?;
        }
        if let Some(password) = &self.options.password {
            command(read, write, &format!("PASS {password}")).await?;
        }
        if let Some(channel) = self.options.channel {
            command(read, write, &format!("CHANNEL {channel}")).await?;
        }
        command(read, write, "DATA").await
    }
}

#[async_trait]
impl Channel for TcpChannel {
    fn describe(&self) -> String {
        format!("tcp://{}:{}", self.options.host, self.options.port)
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.emit(ConnectionState::Connecting);

        let stream = TcpStream::connect((self.options.host.as_str(), self.options.port)).await?;
        let (read, mut write) = stream.into_split();
        let mut read = BufReader::new(read);
        self.handshake(&mut read, &mut write).await?;

        let events = self.events.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match read.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = events.send(ChannelEvent::Frame(buf[..n].to_vec()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tcp channel read failed");
                        break;
                    }
                }
            }
            let _ = events.send(ChannelEvent::StateChanged(ConnectionState::Disconnected));
        });

        *self.writer.lock().await = Some(write);
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);
        self.emit(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.emit(ConnectionState::Disconnecting);
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            tracing::debug!(error = %e, "tcp channel shutdown failed");
        }
        self.emit(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ChannelError::NotConnected)?;
        writer.write_all(frame).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

async fn command(
    read: &mut BufReader<OwnedReadHalf>,
    write: &mut OwnedWriteHalf,
    line: &str,
) -> Result<(), ChannelError> {
    write.write_all(format!("{line}\r\n").as_bytes()).await?;
    expect_ok(read).await
}

async fn expect_ok(read: &mut BufReader<OwnedReadHalf>) -> Result<(), ChannelError> {
    let mut reply = String::new();
    if read.read_line(&mut reply).await? == 0 {
        return Err(ChannelError::Handshake("connection closed".to_string()));
    }
    if reply.starts_with('+') {
        Ok(())
    } else {
        Err(ChannelError::Handshake(reply.trim().to_string()))
    }
}
