use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ToolboxError;
use crate::ports::Script;

/// Catalog of compiled scripts (name -> script).
///
/// Design:
/// - Filled once at startup (mutable).
/// - Read when the orchestrator is built (immutable).
///
/// This is the loader: a script name from the command line or config file
/// resolves to an executable unit here.
#[derive(Default)]
pub struct ScriptCatalog {
    scripts: BTreeMap<String, Arc<dyn Script>>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self {
            scripts: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        script: Arc<dyn Script>,
    ) -> Result<(), ToolboxError> {
        let name = name.into();
        if self.scripts.contains_key(&name) {
            return Err(ToolboxError::DuplicateScript(name));
        }
        self.scripts.insert(name, script);
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Arc<dyn Script>, ToolboxError> {
        self.scripts
            .get(name)
            .cloned()
            .ok_or_else(|| ToolboxError::UnknownScript {
                name: name.to_string(),
                available: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.scripts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
