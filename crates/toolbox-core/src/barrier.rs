//! Connect/disconnect barrier across all units.
//!
//! Global state transitions:
//! - Setup -> Connecting -> Connected -> Disconnecting -> Disconnected
//! - Setup -> Disconnected (every unit finished without connecting)
//!
//! The barrier never touches the channel itself. When a unit's call makes
//! a global transition due, the call returns a `Transition`; that unit
//! performs the channel operation and then reports back with `complete`.
//! Only one call can ever observe a given transition as due, which is
//! what makes connect and disconnect run exactly once.

use std::fmt;

use crate::error::ToolboxError;
use crate::signal::{Latch, LatchWaiter};
use crate::unit::{UnitId, UnitPhase, UnitTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GlobalPhase {
    Setup,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for GlobalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GlobalPhase::Setup => "SETUP",
            GlobalPhase::Connecting => "CONNECTING",
            GlobalPhase::Connected => "CONNECTED",
            GlobalPhase::Disconnecting => "DISCONNECTING",
            GlobalPhase::Disconnected => "DISCONNECTED",
        };
        f.write_str(label)
    }
}

/// A channel operation the caller must perform on everyone's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Transition {
    Connect,
    Disconnect,
}

pub struct LifecycleBarrier {
    phase: GlobalPhase,
    connected: Latch<()>,
    disconnected: Latch<()>,
}

impl LifecycleBarrier {
    pub fn new() -> Self {
        Self {
            phase: GlobalPhase::Setup,
            connected: Latch::new(),
            disconnected: Latch::new(),
        }
    }

    pub fn phase(&self) -> GlobalPhase {
        self.phase
    }

    /// Move `unit` to `Connecting`.
    ///
    /// Returns `Some(Transition::Connect)` to the one caller that completes
    /// the barrier.
    pub fn connect(
        &mut self,
        units: &mut UnitTable,
        unit: UnitId,
    ) -> Result<Option<Transition>, ToolboxError> {
        let phase = units.phase(unit);
        if !phase.is_setup() {
            return Err(ToolboxError::WrongPhase {
                unit: units.name(unit).to_string(),
                operation: "connect",
                phase: phase.clone(),
            });
        }
        units.set_phase(unit, UnitPhase::Connecting);
        Ok(self.poll(units))
    }

    /// Called once the connected latch fired for a unit waiting in `connect`.
    pub fn mark_connected(&self, units: &mut UnitTable, unit: UnitId) {
        if *units.phase(unit) == UnitPhase::Connecting {
            units.set_phase(unit, UnitPhase::Connected);
        }
    }

    /// Move `unit` to `Disconnected`.
    ///
    /// Returns `Some(Transition::Disconnect)` to the last unit out.
    pub fn disconnect(
        &mut self,
        units: &mut UnitTable,
        unit: UnitId,
    ) -> Result<Option<Transition>, ToolboxError> {
        let phase = units.phase(unit);
        if *phase != UnitPhase::Connected {
            return Err(ToolboxError::WrongPhase {
                unit: units.name(unit).to_string(),
                operation: "disconnect",
                phase: phase.clone(),
            });
        }
        units.set_phase(unit, UnitPhase::Disconnected);
        Ok(self.poll(units))
    }

    /// The unit's body returned.
    ///
    /// A unit still in setup finishes and stops holding up the connect
    /// barrier. A unit that forgot to disconnect is disconnected for it.
    pub fn retire(&mut self, units: &mut UnitTable, unit: UnitId) -> Option<Transition> {
        match units.phase(unit) {
            UnitPhase::Setup => units.set_phase(unit, UnitPhase::Finished),
            UnitPhase::Connected => {
                tracing::warn!(
                    script = units.name(unit),
                    "script returned without disconnecting"
                );
                units.set_phase(unit, UnitPhase::Disconnected);
            }
            _ => {}
        }
        self.poll(units)
    }

    /// Record that the channel operation for `transition` finished and
    /// release everyone waiting on it.
    pub fn complete(&mut self, transition: Transition) {
        match transition {
            Transition::Connect => {
                // An abort may have claimed the disconnect while connect was
                // still in flight; the phase only moves forward.
                if self.phase != GlobalPhase::Connecting {
                    tracing::debug!(phase = %self.phase, "late connect completion ignored");
                    return;
                }
                self.phase = GlobalPhase::Connected;
                self.connected.fire(());
            }
            Transition::Disconnect => {
                self.phase = GlobalPhase::Disconnected;
                self.disconnected.fire(());
            }
        }
        tracing::info!(phase = %self.phase, "barrier advanced");
    }

    /// Claim the disconnect after a failed run, if the channel is open (or
    /// was being opened) and nobody else has claimed it yet.
    pub fn abort(&mut self) -> Option<Transition> {
        if matches!(self.phase, GlobalPhase::Connecting | GlobalPhase::Connected) {
            self.phase = GlobalPhase::Disconnecting;
            Some(Transition::Disconnect)
        } else {
            None
        }
    }

    pub fn connected_waiter(&self) -> LatchWaiter<()> {
        self.connected.waiter()
    }

    pub fn disconnected_waiter(&self) -> LatchWaiter<()> {
        self.disconnected.waiter()
    }

    /// Check whether the current unit phases make a global transition due,
    /// and claim it if so.
    fn poll(&mut self, units: &UnitTable) -> Option<Transition> {
        match self.phase {
            GlobalPhase::Setup => {
                if units.all(|p| *p == UnitPhase::Finished) {
                    // Nobody ever needed the channel.
                    self.phase = GlobalPhase::Disconnected;
                    self.disconnected.fire(());
                    tracing::info!("all scripts finished without connecting");
                    None
                } else if units.all(|p| matches!(p, UnitPhase::Connecting | UnitPhase::Finished)) {
                    self.phase = GlobalPhase::Connecting;
                    Some(Transition::Connect)
                } else {
                    None
                }
            }
            GlobalPhase::Connected => {
                if units.all(|p| matches!(p, UnitPhase::Disconnected | UnitPhase::Finished)) {
                    self.phase = GlobalPhase::Disconnecting;
                    Some(Transition::Disconnect)
                } else {
                    None
                }
            }
            GlobalPhase::Connecting | GlobalPhase::Disconnecting | GlobalPhase::Disconnected => {
                None
            }
        }
    }
}

impl Default for LifecycleBarrier {
    fn default() -> Self {
        Self::new()
    }
}
