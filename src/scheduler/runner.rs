//! Scheduler background loops.
//!
//! Each registered task gets its own tokio loop: a random startup delay
//! within the task's jitter budget, then one tick per interval. A tick
//! whose previous invocation is still running is skipped and recorded, not
//! queued. Bodies run in their own spawned task so a panic or error in one
//! never reaches the loop or any other task.

use crate::scheduler::tasks::{
    MaintenanceTask, ScheduledTask, TaskResult, TaskRunOutcome, TaskRunRecord, TaskStatus,
};
use chrono::Utc;
use futures_util::FutureExt;
use rand::Rng;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Number of run-history entries to keep.
const DEFAULT_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    NotStarted,
    Running,
    Stopped,
}

/// Public snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub state: SchedulerState,
    pub tasks: Vec<TaskStatus>,
    /// Oldest first.
    pub history: Vec<TaskRunRecord>,
}

struct TaskSlot {
    schedule: ScheduledTask,
    body: Arc<dyn MaintenanceTask>,
}

enum Lifecycle {
    NotStarted,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

struct Inner {
    slots: Vec<Arc<TaskSlot>>,
    history: Mutex<VecDeque<TaskRunRecord>>,
    max_history_entries: usize,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
}

impl Inner {
    fn history(&self) -> MutexGuard<'_, VecDeque<TaskRunRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_history(&self, record: TaskRunRecord) {
        let mut history = self.history();
        history.push_back(record);
        while history.len() > self.max_history_entries {
            history.pop_front();
        }
    }

    fn skipped(&self, slot: &TaskSlot) -> TaskRunRecord {
        let now = Utc::now();
        let record = TaskRunRecord {
            task_id: slot.schedule.name.to_owned(),
            started_at: now,
            finished_at: now,
            outcome: TaskRunOutcome::SkippedOverlap,
            summary: "previous run still in progress".to_owned(),
        };
        debug!("scheduler: {} skipped, previous run still in progress", slot.schedule.name);
        self.push_history(record.clone());
        record
    }

    /// Run one invocation. The caller has already claimed the slot.
    async fn execute(&self, slot: &TaskSlot) -> TaskRunRecord {
        let name = slot.schedule.name;
        let started_at = slot.schedule.last_started_at().unwrap_or_else(Utc::now);
        debug!("scheduler: running {name}");

        let result = AssertUnwindSafe(slot.body.run()).catch_unwind().await;
        slot.schedule.end();

        let (outcome, summary) = match result {
            Ok(result @ TaskResult::Success(_)) => (result.outcome(), result.summary()),
            Ok(result @ TaskResult::Error(_)) => {
                warn!("scheduler: {name} failed: {}", result.summary());
                (result.outcome(), result.summary())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                error!("scheduler: {name} panicked: {message}");
                (TaskRunOutcome::Panicked, format!("panicked: {message}"))
            }
        };
        let record = TaskRunRecord {
            task_id: name.to_owned(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            summary,
        };
        self.push_history(record.clone());
        record
    }
}

/// Reconciliation scheduler: independent periodic maintenance loops.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Collects task registrations before the scheduler is built.
pub struct SchedulerBuilder {
    slots: Vec<Arc<TaskSlot>>,
    max_history_entries: usize,
    shutdown: CancellationToken,
}

impl SchedulerBuilder {
    /// Register a task body with its interval and startup jitter budget.
    #[must_use]
    pub fn with_task(
        mut self,
        name: &'static str,
        interval: Duration,
        jitter: Duration,
        body: Arc<dyn MaintenanceTask>,
    ) -> Self {
        if self.slots.iter().any(|slot| slot.schedule.name == name) {
            warn!("scheduler: task {name} registered twice; keeping the first");
            return self;
        }
        self.slots.push(Arc::new(TaskSlot {
            schedule: ScheduledTask::new(name, interval, jitter),
            body,
        }));
        self
    }

    /// Override the in-memory run-history limit.
    #[must_use]
    pub fn with_history_limit(mut self, max_entries: usize) -> Self {
        self.max_history_entries = max_entries.max(1);
        self
    }

    #[must_use]
    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                slots: self.slots,
                history: Mutex::new(VecDeque::new()),
                max_history_entries: self.max_history_entries,
                lifecycle: Mutex::new(Lifecycle::NotStarted),
                shutdown: self.shutdown,
            }),
        }
    }
}

impl Scheduler {
    /// Start registering tasks. `shutdown` stops every loop when cancelled.
    #[must_use]
    pub fn builder(shutdown: CancellationToken) -> SchedulerBuilder {
        SchedulerBuilder {
            slots: Vec::new(),
            max_history_entries: DEFAULT_HISTORY_LIMIT,
            shutdown,
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn every task loop. Returns `false` when already running or stopped.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Running(_) => {
                debug!("scheduler: start ignored, already running");
                return false;
            }
            Lifecycle::Stopped => {
                warn!("scheduler: start ignored after stop");
                return false;
            }
            Lifecycle::NotStarted => {}
        }
        if self.inner.shutdown.is_cancelled() {
            *lifecycle = Lifecycle::Stopped;
            return false;
        }
        let handles = self
            .inner
            .slots
            .iter()
            .map(|slot| {
                let delay = startup_delay(slot.schedule.jitter);
                info!(
                    "scheduler: {} every {}s, first run in {}ms",
                    slot.schedule.name,
                    slot.schedule.interval.as_secs(),
                    delay.as_millis()
                );
                tokio::spawn(run_loop(
                    Arc::clone(&self.inner),
                    Arc::clone(slot),
                    delay,
                ))
            })
            .collect();
        *lifecycle = Lifecycle::Running(handles);
        info!("scheduler started with {} tasks", self.inner.slots.len());
        true
    }

    /// Stop every loop. No loop is started again afterwards.
    pub fn stop(&self) {
        *self.lifecycle() = Lifecycle::Stopped;
        self.inner.shutdown.cancel();
    }

    /// Stop and wait for loops and in-flight bodies to finish.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Stopped);
        self.inner.shutdown.cancel();
        if let Lifecycle::Running(handles) = previous {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("scheduler loop ended abnormally: {e}");
                }
            }
        }
        info!("scheduler stopped");
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        match *self.lifecycle() {
            Lifecycle::NotStarted => SchedulerState::NotStarted,
            Lifecycle::Running(_) => SchedulerState::Running,
            Lifecycle::Stopped => SchedulerState::Stopped,
        }
    }

    /// Run a task immediately under the same non-overlap guard.
    ///
    /// Returns `None` for an unknown task or after stop.
    pub async fn run_now(&self, task_id: &str) -> Option<TaskRunRecord> {
        if self.inner.shutdown.is_cancelled() {
            return None;
        }
        let slot = self
            .inner
            .slots
            .iter()
            .find(|slot| slot.schedule.name == task_id)?;
        if !slot.schedule.try_begin() {
            return Some(self.inner.skipped(slot));
        }
        Some(self.inner.execute(slot).await)
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            state: self.state(),
            tasks: self
                .inner
                .slots
                .iter()
                .map(|slot| slot.schedule.status())
                .collect(),
            history: self.inner.history().iter().cloned().collect(),
        }
    }

    /// Run history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<TaskRunRecord> {
        self.inner.history().iter().cloned().collect()
    }
}

fn startup_delay(jitter: Duration) -> Duration {
    let budget = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    if budget == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=budget))
}

/// Next tick strictly after `now`, skipping any missed multiples.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let mut next = previous + interval;
    if next <= now {
        let behind = now.duration_since(next).as_nanos();
        let step = interval.as_nanos().max(1);
        let missed = u32::try_from(behind / step + 1).unwrap_or(u32::MAX);
        next += interval.saturating_mul(missed);
    }
    next
}

async fn run_loop(inner: Arc<Inner>, slot: Arc<TaskSlot>, delay: Duration) {
    let shutdown = inner.shutdown.clone();
    let interval = slot.schedule.interval.max(Duration::from_millis(1));
    let mut deadline = Instant::now() + delay;
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        if slot.schedule.try_begin() {
            let inner = Arc::clone(&inner);
            let slot = Arc::clone(&slot);
            in_flight = Some(tokio::spawn(async move {
                inner.execute(&slot).await;
            }));
        } else {
            inner.skipped(&slot);
        }

        deadline = next_deadline(deadline, interval, Instant::now());
    }

    if let Some(handle) = in_flight
        && let Err(e) = handle.await
    {
        warn!("scheduler: {} body ended abnormally: {e}", slot.schedule.name);
    }
    debug!("scheduler: {} loop stopped", slot.schedule.name);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Body that counts invocations and overlapping executions.
    #[derive(Default)]
    struct CountingTask {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        work: Duration,
        fail: bool,
        panic: bool,
    }

    impl CountingTask {
        fn working(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                work,
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl MaintenanceTask for CountingTask {
        async fn run(&self) -> TaskResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.panic {
                panic!("task exploded");
            }
            if self.fail {
                return TaskResult::Error("task failed".to_owned());
            }
            TaskResult::Success("ok".to_owned())
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    fn outcomes(scheduler: &Scheduler, task: &str) -> Vec<TaskRunOutcome> {
        scheduler
            .history()
            .into_iter()
            .filter(|r| r.task_id == task)
            .map(|r| r.outcome)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn task_runs_once_per_interval() {
        let counting = CountingTask::working(Duration::from_secs(1));
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", 20 * MINUTE, Duration::ZERO, counting.clone())
            .build();

        assert!(scheduler.start());
        tokio::time::sleep(50 * MINUTE).await;

        // t = 0, 20, 40
        assert_eq!(counting.runs.load(Ordering::SeqCst), 3);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_tick_is_skipped_not_queued() {
        let counting = CountingTask::working(25 * MINUTE);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("slow", 20 * MINUTE, Duration::ZERO, counting.clone())
            .build();

        scheduler.start();
        tokio::time::sleep(50 * MINUTE + Duration::from_secs(1)).await;

        // t=0 starts (ends 25), t=20 skipped, t=40 starts.
        assert_eq!(counting.runs.load(Ordering::SeqCst), 2);
        assert_eq!(counting.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes(&scheduler, "slow"),
            vec![
                TaskRunOutcome::SkippedOverlap,
                TaskRunOutcome::Success
            ]
        );
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let counting = CountingTask::working(Duration::ZERO);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", 20 * MINUTE, Duration::ZERO, counting.clone())
            .build();

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(!scheduler.clone().start());
        tokio::time::sleep(MINUTE).await;

        assert_eq!(counting.runs.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_restart_after_stop() {
        let counting = CountingTask::working(Duration::ZERO);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", 20 * MINUTE, Duration::ZERO, counting.clone())
            .build();

        scheduler.start();
        tokio::time::sleep(MINUTE).await;
        scheduler.shutdown().await;
        assert!(!scheduler.start());
        assert!(scheduler.run_now("counting").await.is_none());
        tokio::time::sleep(60 * MINUTE).await;

        assert_eq!(counting.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_body() {
        let counting = CountingTask::working(5 * MINUTE);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", 20 * MINUTE, Duration::ZERO, counting.clone())
            .build();

        scheduler.start();
        tokio::time::sleep(MINUTE).await;
        assert!(scheduler.snapshot().tasks[0].running);

        scheduler.shutdown().await;
        assert_eq!(counting.active.load(Ordering::SeqCst), 0);
        assert_eq!(outcomes(&scheduler, "counting"), vec![TaskRunOutcome::Success]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_and_panicking_tasks_do_not_affect_others() {
        let healthy = CountingTask::working(Duration::ZERO);
        let failing = Arc::new(CountingTask {
            fail: true,
            ..CountingTask::default()
        });
        let panicking = Arc::new(CountingTask {
            panic: true,
            ..CountingTask::default()
        });
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("healthy", 20 * MINUTE, Duration::ZERO, healthy.clone())
            .with_task("failing", 20 * MINUTE, Duration::ZERO, failing.clone())
            .with_task("panicking", 20 * MINUTE, Duration::ZERO, panicking.clone())
            .build();

        scheduler.start();
        tokio::time::sleep(30 * MINUTE).await;

        assert_eq!(healthy.runs.load(Ordering::SeqCst), 2);
        assert_eq!(failing.runs.load(Ordering::SeqCst), 2);
        assert_eq!(panicking.runs.load(Ordering::SeqCst), 2);
        assert_eq!(
            outcomes(&scheduler, "panicking"),
            vec![TaskRunOutcome::Panicked, TaskRunOutcome::Panicked]
        );
        assert_eq!(
            outcomes(&scheduler, "failing"),
            vec![TaskRunOutcome::Failed, TaskRunOutcome::Failed]
        );
        assert!(!scheduler.snapshot().tasks[2].running);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_waits_within_jitter_budget() {
        let counting = CountingTask::working(Duration::ZERO);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", 20 * MINUTE, Duration::from_secs(10), counting.clone())
            .build();

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(counting.runs.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_now_respects_the_overlap_guard() {
        let counting = CountingTask::working(5 * MINUTE);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", 20 * MINUTE, Duration::ZERO, counting.clone())
            .build();

        scheduler.start();
        tokio::time::sleep(MINUTE).await;
        let record = scheduler.run_now("counting").await.unwrap();

        assert_eq!(record.outcome, TaskRunOutcome::SkippedOverlap);
        assert!(scheduler.run_now("missing").await.is_none());
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_now_executes_before_start() {
        let counting = CountingTask::working(Duration::ZERO);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", 20 * MINUTE, Duration::ZERO, counting.clone())
            .build();

        let record = scheduler.run_now("counting").await.unwrap();
        assert_eq!(record.outcome, TaskRunOutcome::Success);
        assert_eq!(scheduler.state(), SchedulerState::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded() {
        let counting = CountingTask::working(Duration::ZERO);
        let scheduler = Scheduler::builder(CancellationToken::new())
            .with_task("counting", MINUTE, Duration::ZERO, counting.clone())
            .with_history_limit(5)
            .build();

        scheduler.start();
        tokio::time::sleep(20 * MINUTE).await;

        assert_eq!(scheduler.history().len(), 5);
        scheduler.shutdown().await;
    }

    #[test]
    fn missed_deadlines_are_skipped() {
        let start = Instant::now();
        let interval = Duration::from_secs(10);
        assert_eq!(
            next_deadline(start, interval, start + Duration::from_secs(5)),
            start + interval
        );
        assert_eq!(
            next_deadline(start, interval, start + Duration::from_secs(35)),
            start + Duration::from_secs(40)
        );
        assert_eq!(
            next_deadline(start, interval, start + Duration::from_secs(10)),
            start + Duration::from_secs(20)
        );
    }
}
