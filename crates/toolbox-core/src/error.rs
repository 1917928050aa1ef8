use thiserror::Error;

use crate::config::ConfigError;
use crate::ports::ChannelError;
use crate::registry::{DeadlockReport, ServiceId};
use crate::unit::UnitPhase;

/// Errors surfaced to a script through its `ScriptContext`.
///
/// None of these are retried: each one reflects a wiring mistake between
/// scripts, not a transient fault.
#[derive(Debug, Error)]
pub enum ToolboxError {
    #[error("script \"{unit}\" called {operation} while {phase}")]
    WrongPhase {
        unit: String,
        operation: &'static str,
        phase: UnitPhase,
    },

    #[error("script \"{unit}\" re-registered known service \"{service}\"")]
    DuplicateService { unit: String, service: ServiceId },

    #[error("requiring the following services failed:\n{0}")]
    DeadlockDetected(DeadlockReport),

    #[error("service \"{0}\" is not registered")]
    NotFound(ServiceId),

    #[error("service \"{service}\" is not of type {expected}")]
    ServiceTypeMismatch {
        service: ServiceId,
        expected: &'static str,
    },

    #[error("script \"{0}\" is already loaded")]
    DuplicateScript(String),

    #[error("unknown script \"{name}\" (available: {available:?})")]
    UnknownScript {
        name: String,
        available: Vec<String>,
    },

    #[error("orchestrator shut down while script was waiting")]
    Shutdown,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why `Orchestrator::run` stopped early.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("script \"{unit}\" failed: {source}")]
    Unit {
        unit: String,
        #[source]
        source: ToolboxError,
    },

    #[error("script task aborted: {0}")]
    Panicked(String),
}

impl RunError {
    /// The error a unit returned, if the run stopped because of one.
    pub fn unit_error(&self) -> Option<&ToolboxError> {
        match self {
            RunError::Unit { source, .. } => Some(source),
            RunError::Panicked(_) => None,
        }
    }
}
