//! Built-in scripts.
//!
//! - **clock**: publishes a `Clock` service, then finishes
//! - **sensor-simulator**: sends synthetic temperature frames stamped by the clock
//! - **frame-logger**: logs every frame seen on the channel for a while

mod clock;
mod frame_logger;
mod sensor;

use std::sync::Arc;

use toolbox_core::{ScriptCatalog, ToolboxError};

use self::clock::ClockScript;
use self::frame_logger::FrameLogger;
use self::sensor::SensorSimulator;

pub fn catalog() -> Result<ScriptCatalog, ToolboxError> {
    let mut catalog = ScriptCatalog::new();
    catalog.register("clock", Arc::new(ClockScript))?;
    catalog.register("sensor-simulator", Arc::new(SensorSimulator))?;
    catalog.register("frame-logger", Arc::new(FrameLogger))?;
    Ok(catalog)
}
