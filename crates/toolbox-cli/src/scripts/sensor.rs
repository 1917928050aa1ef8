use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use toolbox_core::{Script, ScriptContext, ToolboxError};

use super::clock::{CLOCK_SERVICE, Clock};

const SYNC_BYTE: u8 = 0xaa;

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct SensorConfig {
    source: u16,
    interval_ms: u64,
    frames: u32,
    /// Temperature range in tenths of a degree.
    min_tenths: i16,
    max_tenths: i16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            source: 0x7e11,
            interval_ms: 1000,
            frames: 10,
            min_tenths: -200,
            max_tenths: 800,
        }
    }
}

impl SensorConfig {
    fn validate(&self) -> Result<(), ToolboxError> {
        if self.min_tenths > self.max_tenths {
            return Err(anyhow::anyhow!(
                "sensor range is empty: min_tenths {} > max_tenths {}",
                self.min_tenths,
                self.max_tenths
            )
            .into());
        }
        Ok(())
    }
}

/// Sends `frames` synthetic temperature readings, one per interval.
pub struct SensorSimulator;

#[async_trait]
impl Script for SensorSimulator {
    async fn run(&self, ctx: ScriptContext) -> Result<(), ToolboxError> {
        let config: SensorConfig = ctx.script_config(ctx.name())?;
        config.validate()?;
        let clock = ctx.require::<Clock>(CLOCK_SERVICE).await?;

        ctx.connect().await?;
        for seq in 0..config.frames {
            let tenths = rand::thread_rng().gen_range(config.min_tenths..=config.max_tenths);
            let frame = encode_frame(config.source, seq, clock.now().timestamp(), tenths);
            ctx.send(&frame).await?;
            ctx.delay(Duration::from_millis(config.interval_ms)).await;
        }
        ctx.log(format_args!("sent {} frames", config.frames));
        ctx.disconnect().await
    }
}

/// `[sync][source:2][seq:4][timestamp:8][tenths:2]`, big-endian.
fn encode_frame(source: u16, seq: u32, timestamp: i64, tenths: i16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(17);
    frame.push(SYNC_BYTE);
    frame.extend_from_slice(&source.to_be_bytes());
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&timestamp.to_be_bytes());
    frame.extend_from_slice(&tenths.to_be_bytes());
    frame
}
