//! ScriptContext - the facade a running script talks to.
//!
//! Each script gets its own context bound to its unit, so registry and
//! barrier calls are always made on behalf of the right unit. Everything
//! else (channel traffic, specification, settings) is shared read-only.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use super::Core;
use crate::error::ToolboxError;
use crate::ports::{Channel, ChannelEvent};
use crate::registry::{ServiceId, ServiceValue};
use crate::unit::{UnitId, UnitPhase};

/// Protocol specification handed through to scripts. The orchestrator
/// never looks inside.
pub type Specification = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
pub struct ScriptContext {
    core: Arc<Core>,
    unit: UnitId,
    name: Arc<str>,
}

impl ScriptContext {
    pub(crate) fn new(core: Arc<Core>, unit: UnitId, name: impl Into<Arc<str>>) -> Self {
        Self {
            core,
            unit,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> UnitPhase {
        self.core.unit_phase(self.unit)
    }

    /// Publish `service` under `id` for other scripts.
    ///
    /// Only allowed before `connect`.
    pub fn register<T>(&self, id: impl Into<ServiceId>, service: T) -> Result<Arc<T>, ToolboxError>
    where
        T: Any + Send + Sync,
    {
        let id = id.into();
        let value = self.core.register(self.unit, id.clone(), Arc::new(service))?;
        downcast(id, value)
    }

    /// Wait until some script registers `id`, then return its value.
    ///
    /// Resolves immediately if it is already registered. Fails with
    /// `DeadlockDetected` once no script can register it any more.
    pub async fn require<T>(&self, id: impl Into<ServiceId>) -> Result<Arc<T>, ToolboxError>
    where
        T: Any + Send + Sync,
    {
        let id = id.into();
        let value = self.core.require(self.unit, id.clone()).await?;
        downcast(id, value)
    }

    /// Look up `id` without waiting.
    pub fn get_service<T>(&self, id: impl Into<ServiceId>) -> Result<Arc<T>, ToolboxError>
    where
        T: Any + Send + Sync,
    {
        let id = id.into();
        let value = self.core.get(&id)?;
        downcast(id, value)
    }

    /// Join the connect barrier. Resolves once every script has joined and
    /// the shared channel is open.
    pub async fn connect(&self) -> Result<Arc<dyn Channel>, ToolboxError> {
        self.core.connect(self.unit).await
    }

    /// Leave the channel. The last script out closes it.
    pub async fn disconnect(&self) -> Result<(), ToolboxError> {
        self.core.disconnect(self.unit).await
    }

    pub async fn send(&self, frame: &[u8]) -> Result<(), ToolboxError> {
        self.core.channel().send(frame).await?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.core.channel().subscribe()
    }

    pub fn specification<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.core
            .specification()
            .and_then(|spec| Arc::clone(spec).downcast::<T>().ok())
    }

    /// Settings stored under `key`, with defaults filled in from
    /// `T::default()`.
    pub fn script_config<T>(&self, key: &str) -> Result<T, ToolboxError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        Ok(self.core.script_configs().resolve(key)?)
    }

    pub async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Log a line tagged with this script's name.
    pub fn log(&self, message: impl fmt::Display) {
        tracing::info!(script = %self.name, "{message}");
    }
}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("unit", &self.unit)
            .field("name", &self.name)
            .finish()
    }
}

pub(crate) fn downcast<T>(id: ServiceId, value: ServiceValue) -> Result<Arc<T>, ToolboxError>
where
    T: Any + Send + Sync,
{
    value
        .downcast::<T>()
        .map_err(|_| ToolboxError::ServiceTypeMismatch {
            service: id,
            expected: type_name::<T>(),
        })
}
