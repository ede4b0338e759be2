//! Periodic re-evaluation while the policy is DYNAMIC.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cancellable fixed-period ticker.
///
/// The first tick fires one full period after [`Scheduler::start`]; the
/// caller runs the immediate cycle itself. Each tick receives the task's
/// cancellation token so it can tell whether it has been superseded while
/// waiting on shared state.
#[derive(Default)]
pub struct Scheduler {
    running: Option<RunningTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SchedulerState {
        match &self.running {
            Some(task) if !task.handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Idle,
        }
    }

    /// Start ticking every `period`, replacing any running task.
    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tick(token.clone()) => {}
                }
            }
            tracing::debug!("Re-check schedule stopped");
        });

        tracing::debug!(period_secs = period.as_secs(), "Re-check schedule started");
        self.running = Some(RunningTask { cancel, handle });
    }

    /// Cancel the running task, if any. Does not wait for an in-flight tick.
    pub fn stop(&mut self) {
        if let Some(task) = self.running.take() {
            task.cancel.cancel();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
