use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use toolbox_core::{ChannelEvent, Script, ScriptContext, ToolboxError};

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct LoggerConfig {
    duration_ms: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
        }
    }
}

/// Logs every frame on the channel until `duration_ms` has passed.
pub struct FrameLogger;

#[async_trait]
impl Script for FrameLogger {
    async fn run(&self, ctx: ScriptContext) -> Result<(), ToolboxError> {
        let config: LoggerConfig = ctx.script_config(ctx.name())?;
        let mut events = ctx.subscribe();
        ctx.connect().await?;

        let deadline = tokio::time::sleep(Duration::from_millis(config.duration_ms));
        tokio::pin!(deadline);
        let mut frames = 0usize;
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.recv() => match event {
                    Ok(ChannelEvent::Frame(bytes)) => {
                        frames += 1;
                        ctx.log(hex(&bytes));
                    }
                    Ok(ChannelEvent::StateChanged(state)) => {
                        tracing::debug!(?state, "channel state changed");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "frame logger fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        ctx.log(format_args!("{frames} frames logged"));
        ctx.disconnect().await
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
