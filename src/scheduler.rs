//! Runtime side of the stage plan: spawns, drains and joins virtual users.
//!
//! Each VU is a tokio task running [`VuBody::iterate`] in a loop. A VU is
//! `RUNNING`, `DRAINING` or `EXITED`:
//!
//! - lowering the target marks the highest running ordinals `DRAINING`; the
//!   current iteration finishes, and the VU exits at the top of its next one
//! - raising the target first tries to flip a `DRAINING` VU back to `RUNNING`
//!   and only spawns a new task when that VU already exited
//!
//! Running ordinals therefore always form the range `1..=active`.
//!
//! At the end of the run every VU drains and is joined. In-flight iterations
//! always complete unless a `graceful_stop` bound is configured, in which case
//! VUs still busy after it are aborted and reported.

use async_trait::async_trait;
use rand::rngs::StdRng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::metrics::ACTIVE_VUS;
use crate::policy::{ReadTarget, VuRole};
use crate::stages::StagePlan;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const EXITED: u8 = 2;

/// State owned by a single virtual user.
#[derive(Debug)]
pub struct VuContext {
    /// 1-based ordinal
    pub ordinal: usize,
    pub role: VuRole,
    pub rng: StdRng,

    /// Last code this VU created successfully
    pub last_created: Option<ReadTarget>,

    /// Completed iterations
    pub iterations: u64,
}

/// Work performed by every VU, one iteration at a time.
#[async_trait]
pub trait VuBody: Send + Sync + 'static {
    /// Builds the state of a freshly spawned VU.
    fn spawn_context(&self, ordinal: usize) -> VuContext;

    /// Runs one iteration. Must not return before in-flight work completes.
    async fn iterate(&self, vu: &mut VuContext, stage_index: usize);
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the active count is re-aligned with the plan
    pub tick: Duration,

    /// Upper bound on the final drain; VUs still busy after it are aborted.
    /// None waits for every in-flight iteration to complete.
    pub graceful_stop: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            graceful_stop: None,
        }
    }
}

/// VU count recorded when a stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageObservation {
    pub stage_index: usize,
    pub target: usize,

    /// VUs whose task is alive and not draining
    pub observed_active: usize,

    /// Offset from the start of the run
    pub at: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub observations: Vec<StageObservation>,
    pub peak_active: usize,

    /// VU tasks spawned over the whole run (revivals not included)
    pub spawned: usize,

    pub iterations: u64,

    /// VUs still busy after the graceful stop bound, if one was set
    pub aborted: usize,

    pub elapsed: Duration,
}

struct VuHandle {
    state: Arc<AtomicU8>,
    join: JoinHandle<u64>,
}

pub struct StageScheduler<B: VuBody> {
    plan: Arc<StagePlan>,
    config: SchedulerConfig,
    body: Arc<B>,
}

impl<B: VuBody> StageScheduler<B> {
    pub fn new(plan: StagePlan, config: SchedulerConfig, body: Arc<B>) -> Self {
        Self {
            plan: Arc::new(plan),
            config,
            body,
        }
    }

    /// Drives the plan to completion and joins every VU.
    pub async fn run(self) -> ScheduleReport {
        let start = Instant::now();
        let mut pool = VuPool::new(self.plan.clone(), self.body.clone(), start);
        let mut report = ScheduleReport::default();
        let mut next_stage = 0;

        info!(
            stages = self.plan.len(),
            peak_target = self.plan.peak_target(),
            total_duration = ?self.plan.total_duration(),
            tick = ?self.config.tick,
            "Starting stage scheduler"
        );

        loop {
            let elapsed = start.elapsed();

            // Close every stage whose end has passed, forcing its exact target.
            while next_stage < self.plan.len() && elapsed >= self.plan.stage_end(next_stage) {
                let target = self.plan.stages()[next_stage].target;
                pool.scale_to(target);
                report.observations.push(StageObservation {
                    stage_index: next_stage,
                    target,
                    observed_active: pool.live_running(),
                    at: elapsed,
                });
                info!(
                    stage = next_stage,
                    target = target,
                    active = pool.active,
                    "Stage completed"
                );
                next_stage += 1;
            }

            if next_stage >= self.plan.len() {
                break;
            }

            pool.scale_to(self.plan.target_at(elapsed));
            report.peak_active = report.peak_active.max(pool.active);

            let until_stage_end = self.plan.stage_end(next_stage).saturating_sub(elapsed);
            time::sleep(self.config.tick.min(until_stage_end)).await;
        }

        report.peak_active = report.peak_active.max(pool.active);
        pool.scale_to(0);
        report.spawned = pool.spawned;

        let (iterations, aborted) = pool.join_all(self.config.graceful_stop).await;
        report.iterations = iterations;
        report.aborted = aborted;
        report.elapsed = start.elapsed();

        info!(
            iterations = report.iterations,
            spawned = report.spawned,
            aborted = report.aborted,
            elapsed = ?report.elapsed,
            "All virtual users finished"
        );

        report
    }
}

/// VU slots indexed by `ordinal - 1`.
struct VuPool<B: VuBody> {
    plan: Arc<StagePlan>,
    body: Arc<B>,
    start: Instant,
    slots: Vec<VuHandle>,

    /// Exited tasks replaced by a respawn, joined at the end
    retired: Vec<JoinHandle<u64>>,

    active: usize,
    spawned: usize,
}

impl<B: VuBody> VuPool<B> {
    fn new(plan: Arc<StagePlan>, body: Arc<B>, start: Instant) -> Self {
        Self {
            plan,
            body,
            start,
            slots: Vec::new(),
            retired: Vec::new(),
            active: 0,
            spawned: 0,
        }
    }

    fn scale_to(&mut self, target: usize) {
        while self.active < target {
            let ordinal = self.active + 1;
            let revived = self.slots.get(self.active).map(|handle| {
                handle
                    .state
                    .compare_exchange(DRAINING, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            });

            match revived {
                Some(true) => debug!(ordinal, "Revived draining VU"),
                Some(false) => {
                    let fresh = self.spawn(ordinal);
                    let exited = std::mem::replace(&mut self.slots[self.active], fresh);
                    self.retired.push(exited.join);
                }
                None => {
                    let fresh = self.spawn(ordinal);
                    self.slots.push(fresh);
                }
            }
            self.active += 1;
        }

        while self.active > target {
            self.slots[self.active - 1]
                .state
                .store(DRAINING, Ordering::SeqCst);
            debug!(ordinal = self.active, "Draining VU");
            self.active -= 1;
        }

        ACTIVE_VUS.set(self.active as i64);
    }

    /// Running VUs whose task has not finished.
    ///
    /// Lower than `active` only when a VU task died (a panicking body).
    fn live_running(&self) -> usize {
        self.slots[..self.active]
            .iter()
            .filter(|h| h.state.load(Ordering::SeqCst) == RUNNING && !h.join.is_finished())
            .count()
    }

    fn spawn(&mut self, ordinal: usize) -> VuHandle {
        let state = Arc::new(AtomicU8::new(RUNNING));
        let context = self.body.spawn_context(ordinal);
        debug!(ordinal, role = %context.role, "Spawning VU");

        let join = tokio::spawn(vu_loop(
            self.body.clone(),
            context,
            state.clone(),
            self.plan.clone(),
            self.start,
        ));
        self.spawned += 1;

        VuHandle { state, join }
    }

    async fn join_all(self, graceful_stop: Option<Duration>) -> (u64, usize) {
        let deadline = graceful_stop.map(|d| Instant::now() + d);
        let mut iterations = 0;
        let mut aborted = 0;

        let handles = self
            .retired
            .into_iter()
            .chain(self.slots.into_iter().map(|h| h.join));

        for mut join in handles {
            let joined = match deadline {
                Some(deadline) => time::timeout_at(deadline, &mut join).await,
                None => Ok((&mut join).await),
            };

            match joined {
                Ok(Ok(n)) => iterations += n,
                Ok(Err(e)) => warn!(error = %e, "VU task failed"),
                Err(_) => {
                    join.abort();
                    aborted += 1;
                }
            }
        }

        if aborted > 0 {
            warn!(
                aborted,
                graceful_stop = ?graceful_stop,
                "Aborted VUs still running after the graceful stop period"
            );
        }

        (iterations, aborted)
    }
}

async fn vu_loop<B: VuBody>(
    body: Arc<B>,
    mut vu: VuContext,
    state: Arc<AtomicU8>,
    plan: Arc<StagePlan>,
    start: Instant,
) -> u64 {
    loop {
        if state
            .compare_exchange(DRAINING, EXITED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }

        let stage_index = plan
            .cursor_at(start.elapsed())
            .map_or(plan.len().saturating_sub(1), |c| c.index);

        body.iterate(&mut vu, stage_index).await;
        vu.iterations += 1;
    }

    debug!(ordinal = vu.ordinal, iterations = vu.iterations, "VU exited");
    vu.iterations
}
