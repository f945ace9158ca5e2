//! Per-function scaler — a goal counter plus a single background worker.
//!
//! [`Scaler::grow`] is called from the hot call path and never blocks on
//! the orchestrator: it only raises the goal under a short lock and either
//! spawns the worker or wakes it. The worker runs the state machine
//! described in the crate docs until the goal drops to zero.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;

/// Relax and step-down windows of a scaling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalerTimeouts {
    /// How long capacity must stay unneeded before stepping down.
    pub relax: Duration,
    /// Pause between two consecutive step-downs.
    pub step: Duration,
}

impl Default for ScalerTimeouts {
    fn default() -> Self {
        Self {
            relax: Duration::from_secs(16),
            step: Duration::from_secs(8),
        }
    }
}

/// Where a scaling worker currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePhase {
    Idle,
    ScalingUp,
    Relaxing,
    ScalingDown,
}

struct GoalState {
    goal: u32,
    running: bool,
    phase: ScalePhase,
    acked: u32,
    /// Set by `stop`; no worker is started afterwards.
    closed: bool,
}

struct Inner {
    deployment: String,
    orchestrator: Arc<dyn Orchestrator>,
    timeouts: ScalerTimeouts,
    max_replicas: u32,
    state: Mutex<GoalState>,
    wakeup: Notify,
}

/// Demand-driven scaler of one function deployment.
#[derive(Clone)]
pub struct Scaler {
    inner: Arc<Inner>,
}

impl Scaler {
    pub fn new(
        deployment: impl Into<String>,
        orchestrator: Arc<dyn Orchestrator>,
        timeouts: ScalerTimeouts,
        max_replicas: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deployment: deployment.into(),
                orchestrator,
                timeouts,
                max_replicas: max_replicas.max(1),
                state: Mutex::new(GoalState {
                    goal: 0,
                    running: false,
                    phase: ScalePhase::Idle,
                    acked: 0,
                    closed: false,
                }),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Raise the goal to `goal` (clamped to the replica ceiling).
    ///
    /// Lower or equal goals are ignored, as is any goal once the scaler
    /// was stopped. Returns whether the goal moved.
    /// Must be called from within a Tokio runtime.
    pub fn grow(&self, goal: u32) -> bool {
        let goal = goal.min(self.inner.max_replicas);
        let mut st = self.inner.lock();
        if st.closed || goal <= st.goal {
            return false;
        }
        st.goal = goal;

        if st.running {
            drop(st);
            self.inner.wakeup.notify_one();
        } else {
            st.running = true;
            st.phase = ScalePhase::ScalingUp;
            drop(st);
            debug!(deployment = %self.inner.deployment, goal, "starting scaling worker");
            tokio::spawn(Inner::run(Arc::clone(&self.inner)));
        }
        true
    }

    /// Drop the goal to zero for good; a running worker winds down
    /// without touching the orchestrator again and later grows are
    /// ignored.
    pub fn stop(&self) {
        {
            let mut st = self.inner.lock();
            st.goal = 0;
            st.closed = true;
        }
        self.inner.wakeup.notify_one();
    }

    pub fn goal(&self) -> u32 {
        self.inner.lock().goal
    }

    /// Replica count last acknowledged by the orchestrator.
    pub fn acked(&self) -> u32 {
        self.inner.lock().acked
    }

    pub fn phase(&self) -> ScalePhase {
        self.inner.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

// ── Worker ────────────────────────────────────────────────────────

impl Inner {
    fn lock(&self) -> MutexGuard<'_, GoalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn goal(&self) -> u32 {
        self.lock().goal
    }

    async fn run(self: Arc<Self>) {
        let mut acked = 0;
        let mut phase = ScalePhase::ScalingUp;

        loop {
            phase = match phase {
                ScalePhase::ScalingUp => self.scale_up(&mut acked).await,
                ScalePhase::Relaxing => self.relax(acked).await,
                ScalePhase::ScalingDown => self.scale_down(&mut acked).await,
                ScalePhase::Idle => {
                    if self.try_finish() {
                        break;
                    }
                    // A grow slipped in after the decision to stop.
                    ScalePhase::ScalingUp
                }
            };

            let mut st = self.lock();
            st.phase = phase;
            st.acked = acked;
        }

        info!(deployment = %self.deployment, "scaling worker finished");
    }

    /// Leave the loop only if the goal is still zero; clears `running`
    /// in the same critical section so a concurrent grow spawns anew.
    fn try_finish(&self) -> bool {
        let mut st = self.lock();
        if st.goal > 0 && !st.closed {
            return false;
        }
        st.running = false;
        st.phase = ScalePhase::Idle;
        true
    }

    async fn scale_up(&self, acked: &mut u32) -> ScalePhase {
        let requested = self.goal();
        if requested == 0 {
            return ScalePhase::Idle;
        }

        debug!(deployment = %self.deployment, goal = requested, "scaling up");
        let stalled = match self.orchestrator.set_replicas(&self.deployment, requested).await {
            Ok(n) => {
                *acked = n;
                n < requested
            }
            Err(e) => {
                warn!(deployment = %self.deployment, goal = requested, error = %e, "scale up failed");
                true
            }
        };

        let goal = self.goal();
        if goal == 0 {
            return ScalePhase::Idle;
        }
        if goal > *acked {
            if stalled && goal == requested {
                // Orchestrator fell short without new demand; back off a step.
                self.wait_for_change(Instant::now() + self.timeouts.step, goal)
                    .await;
            }
            return ScalePhase::ScalingUp;
        }
        ScalePhase::Relaxing
    }

    async fn relax(&self, acked: u32) -> ScalePhase {
        let mut observed = self.goal();
        loop {
            let deadline = Instant::now() + self.timeouts.relax;
            let changed = self.wait_for_change(deadline, observed).await;

            let goal = self.goal();
            if goal == 0 {
                return ScalePhase::Idle;
            }
            if goal > acked {
                return ScalePhase::ScalingUp;
            }
            if !changed {
                return ScalePhase::ScalingDown;
            }
            // Demand was seen but fits current capacity; restart the window.
            observed = goal;
        }
    }

    async fn scale_down(&self, acked: &mut u32) -> ScalePhase {
        let lowered = {
            let mut st = self.lock();
            if st.goal == 0 {
                return ScalePhase::Idle;
            }
            if st.goal > *acked {
                return ScalePhase::ScalingUp;
            }
            if st.goal <= 1 {
                st.goal = 0;
                return ScalePhase::Idle;
            }
            st.goal -= 1;
            st.goal
        };

        self.wait_for_change(Instant::now() + self.timeouts.step, lowered)
            .await;

        let goal = self.goal();
        if goal == 0 {
            return ScalePhase::Idle;
        }
        if goal > *acked {
            return ScalePhase::ScalingUp;
        }
        if goal == *acked {
            return ScalePhase::Relaxing;
        }

        debug!(deployment = %self.deployment, goal, "scaling down");
        match self.orchestrator.set_replicas(&self.deployment, goal).await {
            Ok(n) => *acked = n,
            Err(e) => {
                warn!(deployment = %self.deployment, goal, error = %e, "scale down failed");
            }
        }
        ScalePhase::ScalingDown
    }

    /// Sleep until `deadline` or until the goal differs from `observed`.
    /// Returns whether the goal changed.
    async fn wait_for_change(&self, deadline: Instant, observed: u32) -> bool {
        loop {
            let notified = self.wakeup.notified();
            if self.goal() != observed {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.goal() != observed;
            }
        }
    }
}
