//! Orchestrator - runs every loaded script to completion.
//!
//! All lifecycle state (unit phases, services, barrier) lives in one
//! `Lifecycle` behind a single lock. Every operation takes the lock, makes
//! its state change and picks up whatever it has to wait on, then releases
//! the lock before awaiting anything. Channel connect/disconnect are
//! performed by whichever unit the barrier hands the `Transition` to.

mod builder;
mod context;

pub use builder::OrchestratorBuilder;
pub use context::{ScriptContext, Specification};

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;
use tracing::Instrument;
use ulid::Ulid;

use crate::barrier::{GlobalPhase, LifecycleBarrier, Transition};
use crate::config::ScriptConfigs;
use crate::error::{RunError, ToolboxError};
use crate::ports::{Channel, Script};
use crate::registry::{
    DeadlockReport, Requirement, ServiceId, ServiceRegistry, ServiceValue, Wake,
};
use crate::unit::{UnitId, UnitPhase, UnitTable};

/// State shared by every unit of one run.
pub(crate) struct Lifecycle {
    units: UnitTable,
    registry: ServiceRegistry,
    barrier: LifecycleBarrier,
    /// First deadlock seen in this run. Sticky: a deadlock is fatal even if
    /// the scripts it woke swallow the error.
    deadlock: Option<DeadlockReport>,
}

impl Lifecycle {
    fn scan_deadlock(&mut self) {
        if let Some(report) = self.registry.fail_if_deadlocked(&self.units) {
            self.deadlock.get_or_insert(report);
        }
    }
}

pub(crate) struct Core {
    state: Mutex<Lifecycle>,
    channel: Arc<dyn Channel>,
    specification: Option<Specification>,
    script_configs: ScriptConfigs,
}

impl Core {
    pub(crate) fn new(
        names: Vec<String>,
        channel: Arc<dyn Channel>,
        specification: Option<Specification>,
        script_configs: ScriptConfigs,
    ) -> Self {
        Self {
            state: Mutex::new(Lifecycle {
                units: UnitTable::new(names),
                registry: ServiceRegistry::new(),
                barrier: LifecycleBarrier::new(),
                deadlock: None,
            }),
            channel,
            specification,
            script_configs,
        }
    }

    // Never held across an await.
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub(crate) fn specification(&self) -> Option<&Specification> {
        self.specification.as_ref()
    }

    pub(crate) fn script_configs(&self) -> &ScriptConfigs {
        &self.script_configs
    }

    pub(crate) fn unit_phase(&self, unit: UnitId) -> UnitPhase {
        self.lock().units.phase(unit).clone()
    }

    pub(crate) fn global_phase(&self) -> GlobalPhase {
        self.lock().barrier.phase()
    }

    pub(crate) fn register(
        &self,
        unit: UnitId,
        id: ServiceId,
        value: ServiceValue,
    ) -> Result<ServiceValue, ToolboxError> {
        let mut state = self.lock();
        let Lifecycle {
            units, registry, ..
        } = &mut *state;
        registry.register(units, unit, id, value)
    }

    pub(crate) fn get(&self, id: &ServiceId) -> Result<ServiceValue, ToolboxError> {
        self.lock().registry.get(id)
    }

    pub(crate) fn service_ids(&self) -> Vec<ServiceId> {
        self.lock().registry.service_ids()
    }

    pub(crate) fn service_owner(&self, id: &ServiceId) -> Option<String> {
        let state = self.lock();
        state
            .registry
            .owner(id)
            .map(|unit| state.units.name(unit).to_string())
    }

    pub(crate) fn unit_phases(&self) -> Vec<(String, UnitPhase)> {
        self.lock()
            .units
            .iter()
            .map(|u| (u.name.clone(), u.phase.clone()))
            .collect()
    }

    pub(crate) async fn require(
        &self,
        unit: UnitId,
        id: ServiceId,
    ) -> Result<ServiceValue, ToolboxError> {
        let waiter = {
            let mut state = self.lock();
            let Lifecycle {
                units,
                registry,
                deadlock,
                ..
            } = &mut *state;
            let requirement = registry.require(units, unit, id.clone());
            if let Err(ToolboxError::DeadlockDetected(report)) = &requirement {
                deadlock.get_or_insert_with(|| report.clone());
            }
            match requirement? {
                Requirement::Ready(value) => return Ok(value),
                Requirement::Pending(waiter) => waiter,
            }
        };

        tracing::debug!(service = %id, "waiting for service");
        match waiter.wait().await {
            Some(Wake::Registered(value)) => {
                let mut state = self.lock();
                let Lifecycle {
                    units, registry, ..
                } = &mut *state;
                registry.resolve(units, unit);
                Ok(value)
            }
            Some(Wake::Deadlocked(report)) => Err(ToolboxError::DeadlockDetected(report)),
            None => Err(ToolboxError::Shutdown),
        }
    }

    pub(crate) async fn connect(&self, unit: UnitId) -> Result<Arc<dyn Channel>, ToolboxError> {
        let (transition, connected) = {
            let mut state = self.lock();
            let transition = {
                let Lifecycle { units, barrier, .. } = &mut *state;
                barrier.connect(units, unit)?
            };
            // One fewer unit that could still register something.
            state.scan_deadlock();
            (transition, state.barrier.connected_waiter())
        };

        if let Some(transition) = transition {
            self.perform(transition).await?;
        }
        connected.wait().await.ok_or(ToolboxError::Shutdown)?;

        {
            let mut state = self.lock();
            let Lifecycle { units, barrier, .. } = &mut *state;
            barrier.mark_connected(units, unit);
        }
        Ok(Arc::clone(&self.channel))
    }

    pub(crate) async fn disconnect(&self, unit: UnitId) -> Result<(), ToolboxError> {
        let (transition, disconnected) = {
            let mut state = self.lock();
            let Lifecycle { units, barrier, .. } = &mut *state;
            let transition = barrier.disconnect(units, unit)?;
            (transition, barrier.disconnected_waiter())
        };

        if let Some(transition) = transition {
            self.perform(transition).await?;
        }
        disconnected.wait().await.ok_or(ToolboxError::Shutdown)
    }

    /// The unit's body returned successfully.
    ///
    /// A unit still stuck on a service after a deadlock swallowed the
    /// error; it fails here so the run cannot hang on it.
    pub(crate) async fn retire(&self, unit: UnitId) -> Result<(), ToolboxError> {
        let transition = {
            let mut state = self.lock();
            if let UnitPhase::Requiring(_) = state.units.phase(unit)
                && let Some(report) = &state.deadlock
            {
                return Err(ToolboxError::DeadlockDetected(report.clone()));
            }
            let transition = {
                let Lifecycle { units, barrier, .. } = &mut *state;
                barrier.retire(units, unit)
            };
            state.scan_deadlock();
            transition
        };

        if let Some(transition) = transition {
            self.perform(transition).await?;
        }
        Ok(())
    }

    /// Close the channel after a failed run if it is open or was being
    /// opened when the run stopped.
    pub(crate) async fn abort(&self) {
        let transition = self.lock().barrier.abort();
        if let Some(transition) = transition
            && let Err(e) = self.perform(transition).await
        {
            tracing::warn!(error = %e, "closing channel after failure failed");
        }
    }

    async fn perform(&self, transition: Transition) -> Result<(), ToolboxError> {
        match transition {
            Transition::Connect => {
                tracing::info!(channel = %self.channel.describe(), "opening channel");
                self.channel.connect().await?;
            }
            Transition::Disconnect => {
                tracing::info!(channel = %self.channel.describe(), "closing channel");
                self.channel.disconnect().await?;
            }
        }
        self.lock().barrier.complete(transition);
        Ok(())
    }
}

struct LoadedScript {
    unit: UnitId,
    name: String,
    script: Arc<dyn Script>,
}

/// A set of scripts ready to run against one channel.
///
/// # Example
/// ```ignore
/// let orchestrator = Orchestrator::builder(channel)
///     .load_from(&catalog, "clock")?
///     .load_from(&catalog, "frame-logger")?
///     .build();
/// orchestrator.run().await?;
/// ```
pub struct Orchestrator {
    core: Arc<Core>,
    scripts: Vec<LoadedScript>,
    run_id: Ulid,
}

impl Orchestrator {
    pub fn builder(channel: Arc<dyn Channel>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(channel)
    }

    pub(crate) fn new(core: Core, scripts: Vec<(String, Arc<dyn Script>)>) -> Self {
        let scripts = scripts
            .into_iter()
            .enumerate()
            .map(|(index, (name, script))| LoadedScript {
                unit: UnitId::new(index),
                name,
                script,
            })
            .collect();
        Self {
            core: Arc::new(core),
            scripts,
            run_id: Ulid::new(),
        }
    }

    pub fn run_id(&self) -> Ulid {
        self.run_id
    }

    pub fn script_names(&self) -> Vec<&str> {
        self.scripts.iter().map(|s| s.name.as_str()).collect()
    }

    /// Read-only view of the services and barrier, usable during and after
    /// a run.
    pub fn services(&self) -> ServiceDirectory {
        ServiceDirectory {
            core: Arc::clone(&self.core),
        }
    }

    /// Run every script concurrently until all of them returned and the
    /// channel is closed.
    ///
    /// The first script error stops the run: remaining scripts are
    /// cancelled and the channel is closed if it was open.
    pub async fn run(self) -> Result<(), RunError> {
        let span = tracing::info_span!("run", run_id = %self.run_id);
        self.drive().instrument(span).await
    }

    async fn drive(self) -> Result<(), RunError> {
        if self.scripts.is_empty() {
            tracing::info!("no scripts loaded");
            return Ok(());
        }

        let disconnected = self.core.lock().barrier.disconnected_waiter();
        let mut tasks = JoinSet::new();
        for LoadedScript { unit, name, script } in self.scripts {
            let core = Arc::clone(&self.core);
            let ctx = ScriptContext::new(Arc::clone(&core), unit, name.as_str());
            let span = tracing::info_span!("script", name = %name);
            tasks.spawn(
                async move {
                    tracing::debug!("script started");
                    let result = match script.run(ctx).await {
                        Ok(()) => core.retire(unit).await,
                        Err(e) => Err(e),
                    };
                    (name, result)
                }
                .instrument(span),
            );
        }
        tracing::info!(scripts = tasks.len(), "scripts started");

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(script = %name, "script finished");
                    continue;
                }
                Ok((name, Err(source))) => RunError::Unit { unit: name, source },
                Err(e) => RunError::Panicked(e.to_string()),
            };
            tracing::error!(error = %failure, "stopping run");
            tasks.abort_all();
            self.core.abort().await;
            return Err(failure);
        }

        disconnected.wait().await;
        tracing::info!("run complete");
        Ok(())
    }
}

/// Handle for inspecting an orchestrator from outside the scripts.
#[derive(Clone)]
pub struct ServiceDirectory {
    core: Arc<Core>,
}

impl ServiceDirectory {
    pub fn get<T>(&self, id: impl Into<ServiceId>) -> Result<Arc<T>, ToolboxError>
    where
        T: std::any::Any + Send + Sync,
    {
        let id = id.into();
        let value = self.core.get(&id)?;
        context::downcast(id, value)
    }

    pub fn ids(&self) -> Vec<ServiceId> {
        self.core.service_ids()
    }

    /// Name of the script that registered `id`.
    pub fn owner(&self, id: impl Into<ServiceId>) -> Option<String> {
        self.core.service_owner(&id.into())
    }

    /// Every script with its current phase, in load order.
    pub fn scripts(&self) -> Vec<(String, UnitPhase)> {
        self.core.unit_phases()
    }

    pub fn phase(&self) -> GlobalPhase {
        self.core.global_phase()
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};
    use std::time::Duration;

    use super::*;
    use crate::impls::VirtualChannel;
    use crate::ports::{ChannelEvent, script_fn};

    fn core(names: &[&str], channel: &Arc<VirtualChannel>) -> Arc<Core> {
        let channel: Arc<dyn Channel> = channel.clone();
        Arc::new(Core::new(
            names.iter().map(|n| n.to_string()).collect(),
            channel,
            None,
            ScriptConfigs::new(),
        ))
    }

    fn contexts(core: &Arc<Core>, names: &[&str]) -> Vec<ScriptContext> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ScriptContext::new(Arc::clone(core), UnitId::new(i), *name))
            .collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_waits_for_every_unit() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["a", "b"], &channel);
        let ctx = contexts(&core, &["a", "b"]);

        let a = ctx[0].clone();
        let first = tokio::spawn(async move { a.connect().await.map(|_| ()) });
        settle().await;
        assert!(!first.is_finished());
        assert_eq!(channel.connect_count(), 0);
        assert_eq!(ctx[0].phase(), UnitPhase::Connecting);

        ctx[1].connect().await.unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(channel.connect_count(), 1);
        assert_eq!(ctx[0].phase(), UnitPhase::Connected);
        assert_eq!(core.global_phase(), GlobalPhase::Connected);
    }

    #[tokio::test]
    async fn disconnect_waits_for_every_unit() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["a", "b"], &channel);
        let ctx = contexts(&core, &["a", "b"]);

        let (a, b) = (ctx[0].clone(), ctx[1].clone());
        let (ra, rb) = tokio::join!(a.connect(), b.connect());
        ra.unwrap();
        rb.unwrap();

        let first = tokio::spawn(async move { a.disconnect().await });
        settle().await;
        assert!(!first.is_finished());
        assert_eq!(channel.disconnect_count(), 0);

        b.disconnect().await.unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(channel.disconnect_count(), 1);
        assert_eq!(core.global_phase(), GlobalPhase::Disconnected);
    }

    #[tokio::test]
    async fn require_waits_for_later_registration() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["clock", "logger"], &channel);
        let ctx = contexts(&core, &["clock", "logger"]);

        let logger = ctx[1].clone();
        let waiting = tokio::spawn(async move { logger.require::<u32>("clock").await });
        settle().await;
        assert!(!waiting.is_finished());
        assert_eq!(ctx[1].phase(), UnitPhase::Requiring(ServiceId::new("clock")));

        let registered = ctx[0].register("clock", 42u32).unwrap();
        let resolved = waiting.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&registered, &resolved));
        assert_eq!(ctx[1].phase(), UnitPhase::Setup);
    }

    #[tokio::test]
    async fn require_of_registered_service_does_not_suspend() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["clock", "logger"], &channel);
        let ctx = contexts(&core, &["clock", "logger"]);
        ctx[0].register("clock", 7u32).unwrap();

        let mut fut = pin!(ctx[1].require::<u32>("clock"));
        let mut cx = Context::from_waker(Waker::noop());
        let Poll::Ready(Ok(value)) = fut.as_mut().poll(&mut cx) else {
            panic!("require suspended on a registered service");
        };
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_first_value() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["a", "b"], &channel);
        let ctx = contexts(&core, &["a", "b"]);

        ctx[0].register("clock", 1u32).unwrap();
        let err = ctx[1].register("clock", 2u32).unwrap_err();
        assert!(matches!(err, ToolboxError::DuplicateService { ref unit, .. } if unit == "b"));
        assert_eq!(*ctx[1].get_service::<u32>("clock").unwrap(), 1);
    }

    #[tokio::test]
    async fn get_service_checks_type_and_presence() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["a"], &channel);
        let ctx = contexts(&core, &["a"]);

        assert!(matches!(
            ctx[0].get_service::<u32>("clock"),
            Err(ToolboxError::NotFound(_))
        ));
        ctx[0].register("clock", 1u32).unwrap();
        assert!(matches!(
            ctx[0].get_service::<String>("clock"),
            Err(ToolboxError::ServiceTypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn require_after_peer_connects_is_deadlock() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["a", "b"], &channel);
        let ctx = contexts(&core, &["a", "b"]);

        let b = ctx[1].clone();
        let connecting = tokio::spawn(async move { b.connect().await.map(|_| ()) });
        settle().await;

        let err = ctx[0].require::<u32>("x").await.unwrap_err();
        let ToolboxError::DeadlockDetected(report) = err else {
            panic!("expected deadlock, got {err}");
        };
        assert_eq!(report.stuck.len(), 1);
        assert_eq!(report.stuck[0].unit, "a");
        assert_eq!(report.stuck[0].service.as_str(), "x");
        connecting.abort();
    }

    #[tokio::test]
    async fn connect_of_last_registrant_fails_stuck_requirers() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["a", "b"], &channel);
        let ctx = contexts(&core, &["a", "b"]);

        let a = ctx[0].clone();
        let waiting = tokio::spawn(async move { a.require::<u32>("x").await });
        settle().await;
        assert!(!waiting.is_finished());

        let b = ctx[1].clone();
        let _connecting = tokio::spawn(async move { b.connect().await.map(|_| ()) });
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, ToolboxError::DeadlockDetected(_)));
    }

    #[tokio::test]
    async fn wrong_phase_calls_are_rejected() {
        let channel = Arc::new(VirtualChannel::new());
        let core = core(&["a"], &channel);
        let ctx = contexts(&core, &["a"]);

        let err = ctx[0].disconnect().await.unwrap_err();
        assert!(matches!(
            err,
            ToolboxError::WrongPhase { operation: "disconnect", .. }
        ));

        ctx[0].connect().await.unwrap();
        for err in [
            ctx[0].connect().await.map(|_| ()).unwrap_err(),
            ctx[0].register("late", 1u32).map(|_| ()).unwrap_err(),
            ctx[0].require::<u32>("late").await.map(|_| ()).unwrap_err(),
        ] {
            assert!(matches!(err, ToolboxError::WrongPhase { ref phase, .. } if *phase == UnitPhase::Connected));
        }
        assert_eq!(channel.connect_count(), 1);
    }

    #[tokio::test]
    async fn run_connects_and_disconnects_once() {
        let channel = Arc::new(VirtualChannel::new());
        let mut builder = Orchestrator::builder(channel.clone());
        for name in ["a", "b", "c"] {
            builder = builder
                .load(
                    name,
                    script_fn(|ctx| async move {
                        ctx.connect().await?;
                        ctx.disconnect().await
                    }),
                )
                .unwrap();
        }
        let orchestrator = builder.build();
        let services = orchestrator.services();

        orchestrator.run().await.unwrap();
        assert_eq!(channel.connect_count(), 1);
        assert_eq!(channel.disconnect_count(), 1);
        assert_eq!(services.phase(), GlobalPhase::Disconnected);
    }

    #[tokio::test]
    async fn passive_script_does_not_hold_up_the_barrier() {
        let channel = Arc::new(VirtualChannel::new());
        let orchestrator = Orchestrator::builder(channel.clone())
            .load(
                "clock",
                script_fn(|ctx| async move {
                    ctx.register("clock", 1000u64)?;
                    Ok(())
                }),
            )
            .unwrap()
            .load(
                "logger",
                script_fn(|ctx| async move {
                    let clock = ctx.require::<u64>("clock").await?;
                    ctx.connect().await?;
                    ctx.send(&clock.to_be_bytes()).await?;
                    ctx.disconnect().await
                }),
            )
            .unwrap()
            .build();
        let services = orchestrator.services();

        orchestrator.run().await.unwrap();
        assert_eq!(channel.connect_count(), 1);
        assert_eq!(channel.disconnect_count(), 1);
        assert_eq!(*services.get::<u64>("clock").unwrap(), 1000);
        assert_eq!(services.ids(), vec![ServiceId::new("clock")]);
        assert_eq!(services.owner("clock").as_deref(), Some("clock"));
        assert_eq!(
            services.scripts(),
            vec![
                ("clock".to_string(), UnitPhase::Finished),
                ("logger".to_string(), UnitPhase::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn scripts_that_never_connect_leave_channel_alone() {
        let channel = Arc::new(VirtualChannel::new());
        let orchestrator = Orchestrator::builder(channel.clone())
            .load("a", script_fn(|_ctx| async { Ok(()) }))
            .unwrap()
            .load("b", script_fn(|_ctx| async { Ok(()) }))
            .unwrap()
            .build();

        orchestrator.run().await.unwrap();
        assert_eq!(channel.connect_count(), 0);
        assert_eq!(channel.disconnect_count(), 0);
    }

    #[tokio::test]
    async fn empty_run_finishes_immediately() {
        let channel = Arc::new(VirtualChannel::new());
        Orchestrator::builder(channel.clone()).build().run().await.unwrap();
        assert_eq!(channel.connect_count(), 0);
    }

    #[tokio::test]
    async fn script_that_skips_disconnect_is_disconnected() {
        let channel = Arc::new(VirtualChannel::new());
        let orchestrator = Orchestrator::builder(channel.clone())
            .load(
                "forgetful",
                script_fn(|ctx| async move {
                    ctx.connect().await?;
                    Ok(())
                }),
            )
            .unwrap()
            .build();

        orchestrator.run().await.unwrap();
        assert_eq!(channel.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn mutual_requirement_fails_the_run() {
        let channel = Arc::new(VirtualChannel::new());
        let orchestrator = Orchestrator::builder(channel.clone())
            .load(
                "a",
                script_fn(|ctx| async move {
                    ctx.require::<u32>("from-b").await?;
                    ctx.register("from-a", 1u32)?;
                    Ok(())
                }),
            )
            .unwrap()
            .load(
                "b",
                script_fn(|ctx| async move {
                    ctx.require::<u32>("from-a").await?;
                    ctx.register("from-b", 2u32)?;
                    Ok(())
                }),
            )
            .unwrap()
            .build();

        let err = orchestrator.run().await.unwrap_err();
        let Some(ToolboxError::DeadlockDetected(report)) = err.unit_error() else {
            panic!("expected deadlock, got {err}");
        };
        assert_eq!(report.stuck.len(), 2);
        assert!(err.to_string().contains("requiring the following services failed"));
    }

    #[tokio::test]
    async fn failing_script_stops_run_and_closes_channel() {
        let channel = Arc::new(VirtualChannel::new());
        let orchestrator = Orchestrator::builder(channel.clone())
            .load(
                "broken",
                script_fn(|ctx| async move {
                    ctx.connect().await?;
                    Err(ToolboxError::Other(anyhow::anyhow!("bad frame")))
                }),
            )
            .unwrap()
            .load(
                "forever",
                script_fn(|ctx| async move {
                    ctx.connect().await?;
                    std::future::pending::<()>().await;
                    Ok(())
                }),
            )
            .unwrap()
            .build();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, RunError::Unit { ref unit, .. } if unit == "broken"));
        assert_eq!(channel.connect_count(), 1);
        assert_eq!(channel.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn connected_scripts_share_channel_traffic() {
        let channel = Arc::new(VirtualChannel::new());
        let orchestrator = Orchestrator::builder(channel.clone())
            .load(
                "sender",
                script_fn(|ctx| async move {
                    ctx.connect().await?;
                    ctx.delay(Duration::from_millis(10)).await;
                    ctx.send(&[0xaa, 0x01]).await?;
                    ctx.disconnect().await
                }),
            )
            .unwrap()
            .load(
                "receiver",
                script_fn(|ctx| async move {
                    let mut rx = ctx.subscribe();
                    ctx.connect().await?;
                    loop {
                        let event = rx.recv().await.map_err(anyhow::Error::from)?;
                        if event == ChannelEvent::Frame(vec![0xaa, 0x01]) {
                            break;
                        }
                    }
                    ctx.disconnect().await
                }),
            )
            .unwrap()
            .build();

        orchestrator.run().await.unwrap();
    }

    #[tokio::test]
    async fn swallowed_deadlock_still_fails_the_run() {
        let channel = Arc::new(VirtualChannel::new());
        let orchestrator = Orchestrator::builder(channel.clone())
            .load(
                "optional-user",
                script_fn(|ctx| async move {
                    let optional = ctx.require::<u32>("optional").await;
                    assert!(optional.is_err());
                    Ok(())
                }),
            )
            .unwrap()
            .load(
                "connector",
                script_fn(|ctx| async move {
                    ctx.connect().await?;
                    ctx.disconnect().await
                }),
            )
            .unwrap()
            .build();

        let outcome = tokio::time::timeout(Duration::from_millis(500), orchestrator.run())
            .await
            .expect("run hung after a swallowed deadlock");
        let err = outcome.unwrap_err();
        assert!(matches!(
            err,
            RunError::Unit { ref unit, source: ToolboxError::DeadlockDetected(_) } if unit == "optional-user"
        ));
        assert_eq!(channel.connect_count(), 0);
    }

    /// Opens the underlying loopback channel but never reports ready.
    struct StallingChannel {
        inner: VirtualChannel,
    }

    #[async_trait::async_trait]
    impl Channel for StallingChannel {
        fn describe(&self) -> String {
            "stalling loopback".to_string()
        }

        async fn connect(&self) -> Result<(), crate::ports::ChannelError> {
            self.inner.connect().await?;
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), crate::ports::ChannelError> {
            self.inner.disconnect().await
        }

        async fn send(&self, frame: &[u8]) -> Result<(), crate::ports::ChannelError> {
            self.inner.send(frame).await
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChannelEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn abort_during_connect_closes_channel() {
        let channel = Arc::new(StallingChannel {
            inner: VirtualChannel::new(),
        });
        let shared: Arc<dyn Channel> = channel.clone();
        let core = Arc::new(Core::new(
            vec!["a".to_string()],
            shared,
            None,
            ScriptConfigs::new(),
        ));
        let ctx = ScriptContext::new(Arc::clone(&core), UnitId::new(0), "a");

        let connecting = tokio::spawn(async move { ctx.connect().await.map(|_| ()) });
        settle().await;
        assert_eq!(channel.inner.connect_count(), 1);
        assert_eq!(core.global_phase(), GlobalPhase::Connecting);

        connecting.abort();
        core.abort().await;
        assert_eq!(channel.inner.disconnect_count(), 1);
        assert_eq!(core.global_phase(), GlobalPhase::Disconnected);
    }

    #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Settings {
        frames: u32,
    }

    #[tokio::test]
    async fn scripts_see_specification_and_settings() {
        let channel = Arc::new(VirtualChannel::new());
        let mut configs = ScriptConfigs::new();
        configs.insert("reader", serde_json::json!({ "frames": 3 }));

        let orchestrator = Orchestrator::builder(channel)
            .specification(Arc::new(vec![1u8, 2, 3]))
            .script_configs(configs)
            .load(
                "reader",
                script_fn(|ctx| async move {
                    let spec = ctx.specification::<Vec<u8>>().expect("specification");
                    let settings: Settings = ctx.script_config("reader")?;
                    assert_eq!(spec.len(), settings.frames as usize);
                    assert_eq!(ctx.name(), "reader");
                    Ok(())
                }),
            )
            .unwrap()
            .build();

        orchestrator.run().await.unwrap();
    }
}
