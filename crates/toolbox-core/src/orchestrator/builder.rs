//! OrchestratorBuilder - collects scripts and shared inputs for one run.
//!
//! Loading fails fast: a duplicate or unknown script name is reported here,
//! before any script starts.

use std::sync::Arc;

use super::{Core, Orchestrator, Specification};
use crate::catalog::ScriptCatalog;
use crate::config::ScriptConfigs;
use crate::error::ToolboxError;
use crate::ports::{Channel, Script};

pub struct OrchestratorBuilder {
    channel: Arc<dyn Channel>,
    specification: Option<Specification>,
    script_configs: ScriptConfigs,
    scripts: Vec<(String, Arc<dyn Script>)>,
}

impl OrchestratorBuilder {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            specification: None,
            script_configs: ScriptConfigs::new(),
            scripts: Vec::new(),
        }
    }

    pub fn specification(mut self, specification: Specification) -> Self {
        self.specification = Some(specification);
        self
    }

    pub fn script_configs(mut self, script_configs: ScriptConfigs) -> Self {
        self.script_configs = script_configs;
        self
    }

    /// Add a script under `name`. Names must be unique within a run.
    pub fn load(
        mut self,
        name: impl Into<String>,
        script: Arc<dyn Script>,
    ) -> Result<Self, ToolboxError> {
        let name = name.into();
        if self.scripts.iter().any(|(loaded, _)| *loaded == name) {
            return Err(ToolboxError::DuplicateScript(name));
        }
        tracing::debug!(script = %name, "script loaded");
        self.scripts.push((name, script));
        Ok(self)
    }

    /// Look `name` up in `catalog` and load it.
    pub fn load_from(self, catalog: &ScriptCatalog, name: &str) -> Result<Self, ToolboxError> {
        let script = catalog.load(name)?;
        self.load(name, script)
    }

    pub fn build(self) -> Orchestrator {
        let names = self.scripts.iter().map(|(name, _)| name.clone()).collect();
        let core = Core::new(
            names,
            self.channel,
            self.specification,
            self.script_configs,
        );
        Orchestrator::new(core, self.scripts)
    }
}
