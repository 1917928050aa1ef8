//! toolbox-core
//!
//! Runs a set of automation scripts against one shared device channel.
//!
//! # Modules
//! - **unit**: script units and their lifecycle phase
//! - **registry**: services published by scripts, dependency waiting, deadlock detection
//! - **barrier**: connect/disconnect barrier (the channel opens and closes exactly once)
//! - **signal**: one-shot latch used for every wait
//! - **orchestrator**: drives all scripts, per-script `ScriptContext` facade
//! - **catalog**: script name -> compiled script
//! - **config**: connection parameters and per-script settings
//! - **ports**: `Channel` and `Script` traits
//! - **impls**: channel implementations (virtual loopback, TCP)

pub mod barrier;
pub mod catalog;
pub mod config;
pub mod error;
pub mod impls;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod signal;
pub mod unit;

pub use barrier::GlobalPhase;
pub use catalog::ScriptCatalog;
pub use config::{ConnectionConfig, ScriptConfigs, TcpOptions, ToolboxConfig};
pub use error::{RunError, ToolboxError};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ScriptContext, ServiceDirectory};
pub use ports::{Channel, ChannelEvent, Script, script_fn};
pub use registry::ServiceId;
pub use unit::UnitPhase;
