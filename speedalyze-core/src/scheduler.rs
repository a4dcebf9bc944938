use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use speedalyze_metrics::{Collector, per_sec};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Scenario;
use crate::progress::{ProgressFn, ProgressUpdate, StageProgress};
use crate::schedule::{Phase, StageSchedule};
use crate::{Error, Result};

const CONTROL_TICK: Duration = Duration::from_millis(10);
const SPAWN_RETRY_DELAY: Duration = Duration::from_secs(1);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Ramping,
    Holding,
    RampingDown,
    Stopped,
}

impl From<Phase> for SchedulerState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::RampingUp => SchedulerState::Ramping,
            Phase::Holding => SchedulerState::Holding,
            Phase::RampingDown | Phase::Finished => SchedulerState::RampingDown,
        }
    }
}

/// One-way flag shared between the controller and a VU loop.
#[derive(Debug, Clone, Default)]
pub struct Signal(Arc<AtomicBool>);

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-iteration view handed to a [`Workload`].
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub vu_id: u64,
    /// 0-based iteration number within this VU.
    pub iteration: u64,
    interrupt: Signal,
}

impl IterationContext {
    pub fn new(vu_id: u64, iteration: u64, interrupt: Signal) -> Self {
        Self {
            vu_id,
            iteration,
            interrupt,
        }
    }

    /// Set once the loop is about to be force-terminated. Checked between steps.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    Interrupted,
}

/// What each virtual user runs, over and over, until retired.
pub trait Workload: Send + Sync + 'static {
    type Vu: Send + 'static;
    type InitError: std::fmt::Display + Send + 'static;

    fn init_vu(
        &self,
        vu_id: u64,
    ) -> impl Future<Output = std::result::Result<Self::Vu, Self::InitError>> + Send;

    fn iteration(
        &self,
        vu: &mut Self::Vu,
        ctx: &IterationContext,
    ) -> impl Future<Output = IterationOutcome> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub peak_vus: u64,
    pub spawned_vus: u64,
    pub completed_iterations: u64,
    pub interrupted_iterations: u64,
    /// VUs that failed to initialize.
    pub missed_spawns: u64,
    /// Loops aborted after their graceful window expired.
    pub forced_terminations: u64,
    /// Wall-clock time from start until every loop stopped.
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    interrupted: AtomicU64,
}

#[derive(Debug)]
enum VuExit {
    Retired,
    Interrupted,
    InitFailed(String),
}

struct VuSlot {
    id: u64,
    retire: Signal,
    interrupt: Signal,
    handle: JoinHandle<VuExit>,
}

struct Retiring {
    slot: VuSlot,
    deadline: Instant,
}

async fn run_vu<W: Workload>(
    id: u64,
    workload: Arc<W>,
    collector: Arc<Collector>,
    counters: Arc<Counters>,
    retire: Signal,
    interrupt: Signal,
) -> VuExit {
    let mut vu = match workload.init_vu(id).await {
        Ok(vu) => vu,
        Err(err) => return VuExit::InitFailed(err.to_string()),
    };

    let mut iteration = 0u64;
    while !retire.is_raised() {
        let ctx = IterationContext::new(id, iteration, interrupt.clone());
        let started = Instant::now();
        match workload.iteration(&mut vu, &ctx).await {
            IterationOutcome::Completed => {
                collector.record_iteration(started.elapsed());
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            IterationOutcome::Interrupted => {
                counters.interrupted.fetch_add(1, Ordering::Relaxed);
                return VuExit::Interrupted;
            }
        }
        iteration = iteration.saturating_add(1);

        // Iterations that never hit I/O must not starve the controller.
        tokio::task::yield_now().await;
    }

    VuExit::Retired
}

struct Controller<W: Workload> {
    workload: Arc<W>,
    collector: Arc<Collector>,
    counters: Arc<Counters>,
    active_gauge: Arc<AtomicU64>,
    active: Vec<VuSlot>,
    retiring: Vec<Retiring>,
    next_vu_id: u64,
    spawn_blocked_until: Option<Instant>,
    outcome: RunOutcome,
}

impl<W: Workload> Controller<W> {
    fn spawn(&mut self) {
        let id = self.next_vu_id;
        self.next_vu_id = self.next_vu_id.saturating_add(1);

        let retire = Signal::new();
        let interrupt = Signal::new();
        let handle = tokio::spawn(run_vu(
            id,
            self.workload.clone(),
            self.collector.clone(),
            self.counters.clone(),
            retire.clone(),
            interrupt.clone(),
        ));

        self.outcome.spawned_vus = self.outcome.spawned_vus.saturating_add(1);
        self.active.push(VuSlot {
            id,
            retire,
            interrupt,
            handle,
        });
    }

    /// Retires the highest-numbered loops above `target` and spawns up to it.
    fn scale_to(&mut self, target: u64, ramp_down: Duration, now: Instant) {
        let target = usize::try_from(target).unwrap_or(usize::MAX);

        while self.active.len() > target {
            let Some(slot) = self.active.pop() else { break };
            debug!(vu = slot.id, "retiring virtual user");
            slot.retire.raise();
            self.retiring.push(Retiring {
                slot,
                deadline: now + ramp_down,
            });
        }

        if self.spawn_blocked_until.is_some_and(|until| now < until) {
            self.publish_active();
            return;
        }
        self.spawn_blocked_until = None;

        while self.active.len() < target {
            self.spawn();
        }

        self.outcome.peak_vus = self.outcome.peak_vus.max(self.active.len() as u64);
        self.publish_active();
    }

    fn retire_all(&mut self, deadline: Instant) {
        for slot in self.active.drain(..) {
            slot.retire.raise();
            self.retiring.push(Retiring { slot, deadline });
        }
        for r in &mut self.retiring {
            r.deadline = r.deadline.min(deadline);
        }
        self.publish_active();
    }

    fn publish_active(&self) {
        self.active_gauge
            .store(self.active.len() as u64, Ordering::Relaxed);
    }

    async fn reap(&mut self, now: Instant) {
        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|s| s.handle.is_finished());
        self.active = running;
        for slot in done {
            self.finish(slot, now).await;
        }

        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retiring)
            .into_iter()
            .partition(|r| r.slot.handle.is_finished());
        self.retiring = running;
        for r in done {
            self.finish(r.slot, now).await;
        }

        self.publish_active();
    }

    async fn finish(&mut self, slot: VuSlot, now: Instant) {
        match slot.handle.await {
            Ok(VuExit::InitFailed(err)) => {
                self.outcome.missed_spawns = self.outcome.missed_spawns.saturating_add(1);
                self.spawn_blocked_until = Some(now + SPAWN_RETRY_DELAY);
                warn!(vu = slot.id, error = %err, "virtual user failed to initialize; retrying in {SPAWN_RETRY_DELAY:?}");
            }
            Ok(VuExit::Retired | VuExit::Interrupted) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => error!(vu = slot.id, error = %err, "virtual user task failed"),
        }
    }

    /// Aborts retiring loops whose graceful window has expired.
    async fn enforce_deadlines(&mut self, now: Instant) {
        let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retiring)
            .into_iter()
            .partition(|r| now >= r.deadline);
        self.retiring = waiting;

        for r in expired {
            let slot = r.slot;
            if slot.handle.is_finished() {
                self.finish(slot, now).await;
                continue;
            }

            warn!(vu = slot.id, "graceful window expired; terminating virtual user");
            slot.interrupt.raise();
            slot.handle.abort();
            self.outcome.forced_terminations = self.outcome.forced_terminations.saturating_add(1);
            self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
            self.finish(slot, now).await;
        }
    }
}

/// Drives a [`Scenario`]: varies the number of concurrent [`Workload`] loops
/// over time and stops them gracefully at the end.
pub struct Scheduler {
    state: watch::Sender<SchedulerState>,
    stop: Signal,
    progress: Option<ProgressFn>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            state,
            stop: Signal::new(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Raising it ends the schedule early; loops then drain as at a normal end.
    pub fn stop_signal(&self) -> Signal {
        self.stop.clone()
    }

    fn set_state(&self, next: SchedulerState) {
        let changed = self.state.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            *cur = next;
            true
        });
        if changed {
            debug!(state = %next, "scheduler state changed");
        }
    }

    pub async fn start<W: Workload>(
        &self,
        scenario: &Scenario,
        workload: Arc<W>,
        collector: Arc<Collector>,
    ) -> Result<RunOutcome> {
        if self.state() != SchedulerState::Idle {
            return Err(Error::AlreadyStarted);
        }

        let schedule = Arc::new(StageSchedule::new(
            scenario.start_vus(),
            scenario.stages().to_vec(),
        ));
        let active_gauge = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        info!(
            stages = scenario.stages().len(),
            max_vus = scenario.max_vus(),
            duration = ?schedule.total_duration(),
            "run started"
        );
        self.set_state(schedule.phase_at(Duration::ZERO).into());

        let progress_handle = self.progress.clone().map(|progress| {
            spawn_progress(
                progress,
                schedule.clone(),
                started,
                collector.clone(),
                active_gauge.clone(),
                self.subscribe(),
            )
        });

        let counters = Arc::new(Counters::default());
        let mut ctl = Controller {
            workload,
            collector,
            counters: counters.clone(),
            active_gauge,
            active: Vec::new(),
            retiring: Vec::new(),
            next_vu_id: 1,
            spawn_blocked_until: None,
            outcome: RunOutcome::default(),
        };

        let mut interval = tokio::time::interval(CONTROL_TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let now = Instant::now();
            let elapsed = now.duration_since(started);
            if self.stop.is_raised() {
                info!(elapsed = ?elapsed, "stop requested; draining virtual users");
                break;
            }
            if schedule.is_done(elapsed) {
                break;
            }

            self.set_state(schedule.phase_at(elapsed).into());
            ctl.reap(now).await;
            ctl.scale_to(schedule.target_at(elapsed), scenario.ramp_down(), now);
            ctl.enforce_deadlines(now).await;
        }

        self.set_state(SchedulerState::RampingDown);
        ctl.retire_all(Instant::now() + scenario.stop());
        while !ctl.retiring.is_empty() {
            interval.tick().await;
            let now = Instant::now();
            ctl.reap(now).await;
            ctl.enforce_deadlines(now).await;
        }

        if let Some(h) = progress_handle {
            h.abort();
            let _ = h.await;
        }

        let mut outcome = ctl.outcome;
        outcome.completed_iterations = counters.completed.load(Ordering::Relaxed);
        outcome.interrupted_iterations = counters.interrupted.load(Ordering::Relaxed);
        outcome.duration = started.elapsed();

        self.set_state(SchedulerState::Stopped);
        info!(
            peak_vus = outcome.peak_vus,
            iterations = outcome.completed_iterations,
            interrupted = outcome.interrupted_iterations,
            missed_spawns = outcome.missed_spawns,
            duration = ?outcome.duration,
            "run finished"
        );

        Ok(outcome)
    }
}

fn spawn_progress(
    progress: ProgressFn,
    schedule: Arc<StageSchedule>,
    started: Instant,
    collector: Arc<Collector>,
    active_vus: Arc<AtomicU64>,
    state: watch::Receiver<SchedulerState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        let mut tick: u64 = 0;
        let mut last_at = Instant::now();
        let mut last = collector.live();

        loop {
            interval.tick().await;

            tick = tick.saturating_add(1);
            let now = Instant::now();
            let dt = now.duration_since(last_at).as_secs_f64();
            last_at = now;
            let elapsed = now.duration_since(started);

            let totals = collector.live();
            let delta_requests = totals.requests.saturating_sub(last.requests);
            let delta_failures = totals.failures.saturating_sub(last.failures);
            let delta_iterations = totals.iterations.saturating_sub(last.iterations);
            let error_rate_now = if delta_requests == 0 {
                0.0
            } else {
                delta_failures as f64 / delta_requests as f64
            };

            let stage = schedule.stage_snapshot_at(elapsed).map(|st| StageProgress {
                stage: st.index + 1,
                stages: st.count,
                stage_elapsed: st.stage_elapsed,
                stage_remaining: st.stage_remaining,
                start_target: st.start_target,
                end_target: st.end_target,
                current_target: st.current_target,
            });

            (progress)(ProgressUpdate {
                tick,
                elapsed,
                total_duration: schedule.total_duration(),
                state: *state.borrow(),
                stage,
                active_vus: active_vus.load(Ordering::Relaxed),
                rps_now: per_sec(delta_requests, dt),
                error_rate_now,
                iterations_per_sec_now: per_sec(delta_iterations, dt),
                totals: totals.clone(),
            });

            last = totals;
        }
    })
}
