use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use toolbox_core::{Script, ScriptContext, ToolboxError};

pub const CLOCK_SERVICE: &str = "clock";

/// Shared time source. Every script that stamps frames asks for this one,
/// so a configured offset applies everywhere.
#[derive(Debug, Clone)]
pub struct Clock {
    offset: TimeDelta,
}

impl Clock {
    pub fn new(offset: TimeDelta) -> Self {
        Self { offset }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ClockConfig {
    offset_secs: i64,
}

/// Registers the clock and returns without ever connecting.
pub struct ClockScript;

#[async_trait]
impl Script for ClockScript {
    async fn run(&self, ctx: ScriptContext) -> Result<(), ToolboxError> {
        let config: ClockConfig = ctx.script_config(ctx.name())?;
        let offset = TimeDelta::try_seconds(config.offset_secs).unwrap_or_default();
        let clock = ctx.register(CLOCK_SERVICE, Clock::new(offset))?;
        ctx.log(format_args!("clock registered at {}", clock.now().to_rfc3339()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_shifts_now() {
        let clock = Clock::new(TimeDelta::hours(1));
        let diff = clock.now() - Utc::now();
        assert!(diff > TimeDelta::minutes(59));
    }
}
