//! Service registry with dependency waiting and deadlock detection.
//!
//! Design:
//! - `entries`: service id -> owning unit + published value (write-once)
//! - `waiters`: service id -> latch fired on registration (or on deadlock)
//! - Invariant: an id never appears in both maps with an unfired latch
//!
//! This type is plain state. The orchestrator serializes access to it and
//! awaits the returned `LatchWaiter` outside of its lock.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ToolboxError;
use crate::signal::{Latch, LatchWaiter};
use crate::unit::{UnitId, UnitPhase, UnitTable};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque published value. The facade downcasts it to the caller's type.
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

/// One unit that can never make progress, and what it is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckUnit {
    pub unit: String,
    pub service: ServiceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockReport {
    pub stuck: Vec<StuckUnit>,
}

impl fmt::Display for DeadlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .stuck
            .iter()
            .map(|s| format!("- script \"{}\", service \"{}\"", s.unit, s.service))
            .collect();
        f.write_str(&lines.join("\n"))
    }
}

/// What a waiting `require` wakes up with.
#[derive(Clone)]
pub enum Wake {
    Registered(ServiceValue),
    Deadlocked(DeadlockReport),
}

/// Result of `ServiceRegistry::require`.
pub enum Requirement {
    /// Already registered; no suspension.
    Ready(ServiceValue),
    /// Await the waiter, then call `ServiceRegistry::resolve`.
    Pending(LatchWaiter<Wake>),
}

struct ServiceEntry {
    owner: UnitId,
    value: ServiceValue,
}

#[derive(Default)]
pub struct ServiceRegistry {
    entries: HashMap<ServiceId, ServiceEntry>,
    waiters: HashMap<ServiceId, Latch<Wake>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `id` on behalf of `unit`.
    ///
    /// Only allowed while the unit is in setup. Wakes every unit currently
    /// waiting on `id`.
    pub fn register(
        &mut self,
        units: &UnitTable,
        unit: UnitId,
        id: ServiceId,
        value: ServiceValue,
    ) -> Result<ServiceValue, ToolboxError> {
        let phase = units.phase(unit);
        if !phase.is_setup() {
            return Err(ToolboxError::WrongPhase {
                unit: units.name(unit).to_string(),
                operation: "register",
                phase: phase.clone(),
            });
        }
        if self.entries.contains_key(&id) {
            return Err(ToolboxError::DuplicateService {
                unit: units.name(unit).to_string(),
                service: id,
            });
        }

        self.entries.insert(
            id.clone(),
            ServiceEntry {
                owner: unit,
                value: Arc::clone(&value),
            },
        );
        if let Some(latch) = self.waiters.remove(&id) {
            latch.fire(Wake::Registered(Arc::clone(&value)));
        }
        tracing::debug!(script = units.name(unit), service = %id, "service registered");
        Ok(value)
    }

    /// Look up `id` for `unit`, or put the unit into `Requiring` and hand
    /// back a waiter.
    ///
    /// Runs the deadlock scan after the phase change. On deadlock every
    /// stuck unit (including this one) is failed.
    pub fn require(
        &mut self,
        units: &mut UnitTable,
        unit: UnitId,
        id: ServiceId,
    ) -> Result<Requirement, ToolboxError> {
        let phase = units.phase(unit);
        if !phase.is_setup() {
            return Err(ToolboxError::WrongPhase {
                unit: units.name(unit).to_string(),
                operation: "require",
                phase: phase.clone(),
            });
        }
        if let Some(entry) = self.entries.get(&id) {
            return Ok(Requirement::Ready(Arc::clone(&entry.value)));
        }

        units.set_phase(unit, UnitPhase::Requiring(id.clone()));
        let waiter = self.waiters.entry(id).or_default().waiter();

        if let Some(report) = self.fail_if_deadlocked(units) {
            return Err(ToolboxError::DeadlockDetected(report));
        }
        Ok(Requirement::Pending(waiter))
    }

    /// Called after a pending requirement was woken by a registration.
    pub fn resolve(&self, units: &mut UnitTable, unit: UnitId) {
        if matches!(units.phase(unit), UnitPhase::Requiring(_)) {
            units.set_phase(unit, UnitPhase::Setup);
        }
    }

    /// Non-suspending lookup.
    pub fn get(&self, id: &ServiceId) -> Result<ServiceValue, ToolboxError> {
        self.entries
            .get(id)
            .map(|entry| Arc::clone(&entry.value))
            .ok_or_else(|| ToolboxError::NotFound(id.clone()))
    }

    pub fn owner(&self, id: &ServiceId) -> Option<UnitId> {
        self.entries.get(id).map(|entry| entry.owner)
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn service_ids(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Scan for units that can never be satisfied.
    ///
    /// Priority per unit:
    /// - 5: in setup, may still register something
    /// - 4: requiring an id that is already registered (about to resolve)
    /// - 3: requiring an unregistered id
    /// - 2: connecting
    /// - 1: connected, disconnected or finished
    ///
    /// If the highest priority is exactly 3, nobody can register anything
    /// any more and nobody is about to resolve.
    pub fn detect_deadlock(&self, units: &UnitTable) -> Option<DeadlockReport> {
        let max_priority = units
            .iter()
            .map(|u| self.priority(&u.phase))
            .max()
            .unwrap_or(0);
        if max_priority != 3 {
            return None;
        }

        let stuck = units
            .iter()
            .filter_map(|u| {
                u.phase.awaited_service().map(|service| StuckUnit {
                    unit: u.name.clone(),
                    service: service.clone(),
                })
            })
            .collect();
        Some(DeadlockReport { stuck })
    }

    /// Run the scan and, if it trips, wake every stuck waiter with the
    /// report. Returns the report so the caller can fail too.
    pub fn fail_if_deadlocked(&mut self, units: &UnitTable) -> Option<DeadlockReport> {
        let report = self.detect_deadlock(units)?;
        tracing::error!(stuck = report.stuck.len(), "service deadlock detected\n{report}");
        for stuck in &report.stuck {
            if let Some(latch) = self.waiters.get(&stuck.service) {
                latch.fire(Wake::Deadlocked(report.clone()));
            }
        }
        Some(report)
    }

    fn priority(&self, phase: &UnitPhase) -> u8 {
        match phase {
            UnitPhase::Setup => 5,
            UnitPhase::Requiring(id) if self.entries.contains_key(id) => 4,
            UnitPhase::Requiring(_) => 3,
            UnitPhase::Connecting => 2,
            UnitPhase::Connected | UnitPhase::Disconnected | UnitPhase::Finished => 1,
        }
    }
}
