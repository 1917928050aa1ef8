//! Script units and their lifecycle phase.
//!
//! State transitions (per unit):
//! - Setup -> Requiring(id) -> Setup (service resolved)
//! - Setup -> Connecting -> Connected -> Disconnected
//! - Setup -> Finished (body returned without connecting)
//!
//! A unit's phase is only changed through its own facade calls, or by the
//! orchestrator when its body returns.

use std::fmt;

use crate::registry::ServiceId;

/// Index of a unit in the orchestrator's unit table.
///
/// The unit set is fixed once loading finishes, so an index is stable for
/// the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

impl UnitId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitPhase {
    /// May register and require services, or start connecting.
    Setup,

    /// Suspended until the named service is registered.
    Requiring(ServiceId),

    /// Waiting for every other unit to reach the connect barrier.
    Connecting,

    /// The shared channel is open.
    Connected,

    /// Done with the channel.
    Disconnected,

    /// Body returned while still in setup. Holds up neither barrier.
    Finished,
}

impl UnitPhase {
    pub fn is_setup(&self) -> bool {
        matches!(self, UnitPhase::Setup)
    }

    /// Service id this unit is blocked on, if any.
    pub fn awaited_service(&self) -> Option<&ServiceId> {
        match self {
            UnitPhase::Requiring(id) => Some(id),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            UnitPhase::Setup => "SETUP",
            UnitPhase::Requiring(_) => "REQUIRING",
            UnitPhase::Connecting => "CONNECTING",
            UnitPhase::Connected => "CONNECTED",
            UnitPhase::Disconnected => "DISCONNECTED",
            UnitPhase::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitPhase::Requiring(id) => write!(f, "REQUIRING \"{id}\""),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptUnit {
    pub id: UnitId,
    pub name: String,
    pub phase: UnitPhase,
}

/// All loaded units, indexed by `UnitId`.
#[derive(Debug, Default)]
pub struct UnitTable {
    units: Vec<ScriptUnit>,
}

impl UnitTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let units = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| ScriptUnit {
                id: UnitId::new(index),
                name: name.into(),
                phase: UnitPhase::Setup,
            })
            .collect();
        Self { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptUnit> {
        self.units.iter()
    }

    pub fn name(&self, id: UnitId) -> &str {
        &self.units[id.index()].name
    }

    pub fn phase(&self, id: UnitId) -> &UnitPhase {
        &self.units[id.index()].phase
    }

    pub fn set_phase(&mut self, id: UnitId, phase: UnitPhase) {
        let unit = &mut self.units[id.index()];
        tracing::trace!(script = %unit.name, from = %unit.phase, to = %phase, "phase change");
        unit.phase = phase;
    }

    /// True when every unit satisfies `pred`. Vacuously true for no units.
    pub fn all(&self, pred: impl Fn(&UnitPhase) -> bool) -> bool {
        self.units.iter().all(|u| pred(&u.phase))
    }
}
