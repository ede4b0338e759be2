//! The toggle engine: policy, live state and schedule behind one lock.
//!
//! The lock guards the accessor and the schedule, never the network. A cycle
//! takes it once to claim a generation, probes without it, then takes it
//! again to apply. A result whose generation (or, for re-checks, whose
//! cancellation token) has been superseded in between is discarded, so a
//! stale DYNAMIC probe never overwrites a newer policy and readers of the
//! live state only ever wait for a local apply.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::accessor::{StateAccessor, Transition};
use crate::config::PersistedConfig;
use crate::error::{ApplyError, HostError};
use crate::host::ServerHost;
use crate::mode::{self, ToggleMode};
use crate::probe::StatusProbe;
use crate::scheduler::{Scheduler, SchedulerState};
use crate::store::ConfigFileStore;

/// What started a resolve+apply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Command,
    Scheduled,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Startup => "startup",
            Trigger::Command => "command",
            Trigger::Scheduled => "scheduled",
        })
    }
}

/// Result of one resolve+apply cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub policy: ToggleMode,
    pub target: bool,
    pub outcome: Result<Transition, ApplyError>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

struct EngineState<H> {
    accessor: StateAccessor<H>,
    scheduler: Scheduler,
    /// Bumped by every policy change.
    generation: u64,
}

impl<H: ServerHost> EngineState<H> {
    /// Stop the schedule and claim a new generation.
    fn supersede(&mut self) -> u64 {
        self.scheduler.stop();
        self.generation += 1;
        self.generation
    }

    fn current_state(&self) -> Result<bool, HostError> {
        match self.accessor.policy() {
            ToggleMode::Dynamic => self.accessor.live_state(),
            fixed => Ok(fixed.current_state(false)),
        }
    }

    fn recheck_is_stale(&self, token: &CancellationToken) -> bool {
        token.is_cancelled() || self.accessor.policy() != ToggleMode::Dynamic
    }
}

struct EngineInner<H, P> {
    state: Mutex<EngineState<H>>,
    probe: P,
    enabled: bool,
    interval: Duration,
}

/// Handle to the engine. Cheap to clone (Arc).
pub struct ToggleEngine<H, P> {
    inner: Arc<EngineInner<H, P>>,
}

impl<H, P> Clone for ToggleEngine<H, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: ServerHost, P: StatusProbe> ToggleEngine<H, P> {
    pub fn new(config: PersistedConfig, host: H, store: ConfigFileStore, probe: P) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    accessor: StateAccessor::new(host, store, config.toggle_mode),
                    scheduler: Scheduler::new(),
                    generation: 0,
                }),
                probe,
                enabled: config.enabled,
                interval: config.interval(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled
    }

    pub async fn policy(&self) -> ToggleMode {
        self.inner.state.lock().await.accessor.policy()
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        self.inner.state.lock().await.scheduler.state()
    }

    /// Live online-mode as reported by the host.
    ///
    /// Never waits for a probe, only for an apply in progress.
    pub async fn live_state(&self) -> Result<bool, HostError> {
        self.inner.state.lock().await.accessor.live_state()
    }

    /// The boolean the current policy stands for, without probing.
    ///
    /// DYNAMIC reports the host's live value.
    pub async fn current_state(&self) -> Result<bool, HostError> {
        self.inner.state.lock().await.current_state()
    }

    /// Apply the loaded policy once and, for DYNAMIC, start the schedule.
    ///
    /// Returns `None` when the engine is disabled in config.
    pub async fn start(&self) -> Option<CycleReport> {
        if !self.inner.enabled {
            tracing::info!("Online-mode toggling is disabled, not starting");
            return None;
        }

        let policy = self.policy().await;
        tracing::info!(mode = %policy, "Server mode set to: {policy}");
        Some(self.set_policy(policy, Trigger::Startup).await)
    }

    /// Switch to `mode` and apply it immediately.
    ///
    /// If another policy change lands while `mode` is being resolved, the
    /// newer one wins and this report carries [`ApplyError::Superseded`].
    pub async fn toggle(&self, mode: ToggleMode) -> CycleReport {
        self.set_policy(mode, Trigger::Command).await
    }

    /// Switch to the fixed policy opposite to the current state.
    ///
    /// Reading the current state and applying its opposite happen under one
    /// lock, so a re-check cannot change the live value in between.
    pub async fn flip(&self) -> Result<CycleReport, HostError> {
        let mut state = self.inner.state.lock().await;
        let target = !state.current_state()?;
        let mode = ToggleMode::for_state(target);
        state.supersede();

        let span = toggle_tracing::resolve_cycle_span!(Trigger::Command, mode);
        Ok(span.in_scope(|| {
            tracing::Span::current().record("target", target);
            apply_locked(&mut state, mode, target)
        }))
    }

    /// Stop the schedule. In-flight probes are abandoned with it.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.supersede();
        tracing::info!("Toggle engine stopped");
    }

    async fn set_policy(&self, mode: ToggleMode, trigger: Trigger) -> CycleReport {
        let span = toggle_tracing::resolve_cycle_span!(trigger, mode);

        async {
            let generation = self.inner.state.lock().await.supersede();

            let target = mode::resolve(mode, &self.inner.probe).await;
            tracing::Span::current().record("target", target);

            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                tracing::info!("Policy changed while resolving, dropping this result");
                tracing::Span::current().record("outcome", "superseded");
                return CycleReport {
                    policy: mode,
                    target,
                    outcome: Err(ApplyError::Superseded),
                };
            }

            let report = apply_locked(&mut state, mode, target);
            if mode == ToggleMode::Dynamic {
                let weak = Arc::downgrade(&self.inner);
                state
                    .scheduler
                    .start(self.inner.interval, move |token| scheduled_tick(weak.clone(), token));
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn scheduled_cycle(&self, token: CancellationToken) {
        if self.inner.state.lock().await.recheck_is_stale(&token) {
            tracing::debug!("Skipping superseded re-check");
            return;
        }

        let span = toggle_tracing::resolve_cycle_span!(Trigger::Scheduled, ToggleMode::Dynamic);
        async {
            let target = mode::resolve(ToggleMode::Dynamic, &self.inner.probe).await;
            tracing::Span::current().record("target", target);

            let mut state = self.inner.state.lock().await;
            if state.recheck_is_stale(&token) {
                tracing::debug!("Discarding superseded re-check result");
                tracing::Span::current().record("outcome", "superseded");
                return;
            }

            let report = apply_locked(&mut state, ToggleMode::Dynamic, target);
            if let Err(e) = &report.outcome {
                tracing::warn!(error = %e, "Scheduled re-check failed, retrying on next tick");
            }
        }
        .instrument(span)
        .await
    }
}

/// Apply a resolved target. Runs inside the cycle's span with the lock held.
fn apply_locked<H: ServerHost>(
    state: &mut EngineState<H>,
    mode: ToggleMode,
    target: bool,
) -> CycleReport {
    let outcome = state.accessor.apply_and_persist(target, mode);
    let label = match &outcome {
        Ok(Transition::Unchanged { .. }) => "unchanged",
        Ok(Transition::Changed { .. }) => "changed",
        Err(e) => {
            tracing::error!(error = %e, target, "Failed to apply online-mode");
            "failed"
        }
    };
    tracing::Span::current().record("outcome", label);

    CycleReport {
        policy: mode,
        target,
        outcome,
    }
}

async fn scheduled_tick<H: ServerHost, P: StatusProbe>(
    inner: Weak<EngineInner<H, P>>,
    token: CancellationToken,
) {
    if let Some(inner) = inner.upgrade() {
        ToggleEngine { inner }.scheduled_cycle(token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ToggleConfig;
    use crate::host::InMemoryHost;
    use crate::probe::{FixedProbe, Reachability};

    struct Harness {
        engine: ToggleEngine<InMemoryHost, FixedProbe>,
        host: InMemoryHost,
        probe: FixedProbe,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn persisted_mode(&self) -> ToggleMode {
            ToggleConfig::load(&self.dir.path().join("online-toggle.toml"))
                .unwrap()
                .toggle_mode
        }
    }

    fn harness(enabled: bool, mode: ToggleMode, live: bool, reachability: Reachability) -> Harness {
        harness_with_probe(enabled, mode, live, FixedProbe::new(reachability))
    }

    fn harness_with_probe(enabled: bool, mode: ToggleMode, live: bool, probe: FixedProbe) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigFileStore::new(dir.path().join("online-toggle.toml"));
        store.ensure_default().unwrap();
        let host = InMemoryHost::new(live);
        let config = PersistedConfig {
            enabled,
            toggle_mode: mode,
            delay: 60,
        };
        Harness {
            engine: ToggleEngine::new(config, host.clone(), store, probe.clone()),
            host,
            probe,
            dir,
        }
    }

    #[tokio::test]
    async fn test_start_with_on_applies_once() {
        let h = harness(true, ToggleMode::On, false, Reachability::Unreachable);

        let report = h.engine.start().await.unwrap();

        assert_eq!(report.policy, ToggleMode::On);
        assert!(report.target);
        assert_eq!(
            report.outcome.unwrap(),
            Transition::Changed { from: false, to: true }
        );
        let record = h.host.snapshot();
        assert!(record.live);
        assert_eq!(record.reloads, 1);
        assert_eq!(h.probe.calls(), 0);
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Idle);
        assert_eq!(h.persisted_mode(), ToggleMode::On);
    }

    #[tokio::test]
    async fn test_disabled_engine_does_nothing_on_start() {
        let h = harness(false, ToggleMode::Dynamic, false, Reachability::Reachable);

        assert!(h.engine.start().await.is_none());
        assert!(!h.engine.enabled());
        assert_eq!(h.host.snapshot().live_writes, 0);
        assert_eq!(h.probe.calls(), 0);
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_schedule_until_switched_off() {
        let h = harness(true, ToggleMode::On, false, Reachability::Reachable);

        let report = h.engine.toggle(ToggleMode::Dynamic).await;
        assert!(report.is_success());
        assert!(report.target);
        assert_eq!(h.probe.calls(), 1);
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Running);
        assert_eq!(h.persisted_mode(), ToggleMode::Dynamic);

        h.probe.set(Reachability::Unreachable);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.probe.calls(), 2);
        assert!(!h.host.snapshot().live);

        h.engine.toggle(ToggleMode::Off).await;
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Idle);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.probe.calls(), 2);
        assert_eq!(h.persisted_mode(), ToggleMode::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_dynamic_runs_schedule() {
        let h = harness(true, ToggleMode::Dynamic, false, Reachability::Reachable);

        let report = h.engine.start().await.unwrap();
        assert_eq!(report.outcome.unwrap(), Transition::Changed { from: false, to: true });
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Running);

        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(h.probe.calls(), 4);
        // Reachability never changed, so only the first cycle wrote.
        assert_eq!(h.host.snapshot().live_writes, 1);

        h.engine.shutdown().await;
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ticks_do_not_stop_schedule() {
        let h = harness(true, ToggleMode::Dynamic, true, Reachability::Unreachable);
        h.host.fail_writes(true);

        let report = h.engine.start().await.unwrap();
        assert!(matches!(report.outcome, Err(ApplyError::Host(_))));

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(h.probe.calls(), 3);
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Running);

        h.host.fail_writes(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.host.snapshot().live);
    }

    #[tokio::test]
    async fn test_current_state_follows_policy() {
        let h = harness(true, ToggleMode::Off, true, Reachability::Reachable);
        assert!(!h.engine.current_state().await.unwrap());

        h.engine.toggle(ToggleMode::Dynamic).await;
        h.host.fail_reads(true);
        assert!(h.engine.current_state().await.is_err());
        h.host.fail_reads(false);
        assert!(h.engine.current_state().await.unwrap());
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_toggle_to_same_state_is_unchanged() {
        let h = harness(true, ToggleMode::On, true, Reachability::Reachable);

        let report = h.engine.toggle(ToggleMode::On).await;

        assert_eq!(report.outcome.unwrap(), Transition::Unchanged { online: true });
        assert_eq!(h.host.snapshot().reloads, 0);
    }

    fn slow_probe() -> FixedProbe {
        FixedProbe::new(Reachability::Reachable).with_delay(Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_state_answers_while_recheck_is_probing() {
        let h = harness_with_probe(true, ToggleMode::Dynamic, true, slow_probe());
        h.engine.start().await.unwrap();

        // Started at t=10, so the first re-check probes from t=70 to t=80.
        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(h.probe.calls(), 2);

        let before = tokio::time::Instant::now();
        assert!(h.engine.live_state().await.unwrap());
        assert!(h.engine.current_state().await.unwrap());
        assert_eq!(h.engine.policy().await, ToggleMode::Dynamic);
        assert!(before.elapsed() < Duration::from_secs(1));

        h.engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_discards_in_flight_recheck() {
        let h = harness_with_probe(true, ToggleMode::Dynamic, false, slow_probe());
        h.engine.start().await.unwrap();
        assert!(h.host.snapshot().live);

        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(h.probe.calls(), 2);

        let before = tokio::time::Instant::now();
        let report = h.engine.toggle(ToggleMode::Off).await;
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(
            report.outcome.unwrap(),
            Transition::Changed { from: true, to: false }
        );

        tokio::time::sleep(Duration::from_secs(300)).await;
        let record = h.host.snapshot();
        assert!(!record.live);
        assert_eq!(record.live_writes, 2);
        assert_eq!(h.probe.calls(), 2);
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Idle);
        assert_eq!(h.persisted_mode(), ToggleMode::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_toggle_wins_over_resolving_dynamic() {
        let h = harness_with_probe(true, ToggleMode::Off, false, slow_probe());

        let engine = h.engine.clone();
        let pending = tokio::spawn(async move { engine.toggle(ToggleMode::Dynamic).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.probe.calls(), 1);

        let report = h.engine.toggle(ToggleMode::Off).await;
        assert_eq!(report.outcome.unwrap(), Transition::Unchanged { online: false });

        let stale = pending.await.unwrap();
        assert_eq!(stale.policy, ToggleMode::Dynamic);
        assert!(matches!(stale.outcome, Err(ApplyError::Superseded)));

        assert!(!h.host.snapshot().live);
        assert_eq!(h.host.snapshot().live_writes, 0);
        assert_eq!(h.engine.policy().await, ToggleMode::Off);
        assert_eq!(h.persisted_mode(), ToggleMode::Off);
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flip_from_dynamic_uses_live_state() {
        let h = harness(true, ToggleMode::Dynamic, false, Reachability::Reachable);
        h.engine.start().await.unwrap();
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Running);

        let report = h.engine.flip().await.unwrap();
        assert_eq!(report.policy, ToggleMode::Off);
        assert_eq!(
            report.outcome.unwrap(),
            Transition::Changed { from: true, to: false }
        );
        assert_eq!(h.engine.scheduler_state().await, SchedulerState::Idle);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.probe.calls(), 1);
        assert!(!h.host.snapshot().live);

        h.host.fail_reads(true);
        h.engine.toggle(ToggleMode::Dynamic).await;
        assert!(h.engine.flip().await.is_err());
        assert_eq!(h.engine.policy().await, ToggleMode::Dynamic);
        h.engine.shutdown().await;
    }
}
