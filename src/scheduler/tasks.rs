//! Scheduled task definitions and the built-in maintenance tasks.
//!
//! Defines [`ScheduledTask`] (interval, startup jitter, in-flight flag), the
//! [`MaintenanceTask`] body trait, run-history records, and the three
//! built-ins: drift sweep, history retention and the activity cycle.

use crate::error::BotError;
use crate::labels::{LabelMachine, LabelOutcome};
use crate::platform::{ActivityKind, Platform, Presence};
use crate::resources::{NamedResource, ResourceCache};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const TASK_DRIFT_SWEEP: &str = "drift_sweep";
pub const TASK_HISTORY_RETENTION: &str = "history_retention";
pub const TASK_ACTIVITY_CYCLE: &str = "activity_cycle";

/// Outcome of executing a task body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// Task completed with a summary message.
    Success(String),
    /// Task failed; the scheduler keeps running.
    Error(String),
}

impl TaskResult {
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Success(s) | Self::Error(s) => s.clone(),
        }
    }

    #[must_use]
    pub fn outcome(&self) -> TaskRunOutcome {
        match self {
            Self::Success(_) => TaskRunOutcome::Success,
            Self::Error(_) => TaskRunOutcome::Failed,
        }
    }
}

/// Recorded outcome of one scheduled invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunOutcome {
    Success,
    Failed,
    Panicked,
    /// The previous invocation was still running; this one was dropped.
    SkippedOverlap,
}

/// One entry of the scheduler's run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRunRecord {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: TaskRunOutcome,
    pub summary: String,
}

/// Body of a periodic task.
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    async fn run(&self) -> TaskResult;
}

/// A task registered with the scheduler.
///
/// `running` is owned by the scheduler: set when an invocation starts,
/// cleared when it ends, and checked on every tick.
#[derive(Debug)]
pub struct ScheduledTask {
    pub name: &'static str,
    pub interval: Duration,
    pub jitter: Duration,
    running: AtomicBool,
    last_started_at: Mutex<Option<DateTime<Utc>>>,
}

impl ScheduledTask {
    #[must_use]
    pub fn new(name: &'static str, interval: Duration, jitter: Duration) -> Self {
        Self {
            name,
            interval,
            jitter,
            running: AtomicBool::new(false),
            last_started_at: Mutex::new(None),
        }
    }

    /// Claim the in-flight slot. `false` means an invocation is still running.
    pub(crate) fn try_begin(&self) -> bool {
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            *self
                .last_started_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        }
        claimed
    }

    pub(crate) fn end(&self) {
        self.running.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_started_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            name: self.name,
            interval_secs: self.interval.as_secs(),
            running: self.is_running(),
            last_started_at: self.last_started_at(),
        }
    }
}

/// Point-in-time view of a [`ScheduledTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub name: &'static str,
    pub interval_secs: u64,
    pub running: bool,
    pub last_started_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Built-in tasks
// ---------------------------------------------------------------------------

/// Restores the original label of every empty tracked room whose cached
/// label drifted.
pub struct DriftSweepTask {
    labels: Arc<LabelMachine>,
}

impl DriftSweepTask {
    #[must_use]
    pub fn new(labels: Arc<LabelMachine>) -> Self {
        Self { labels }
    }
}

#[async_trait]
impl MaintenanceTask for DriftSweepTask {
    async fn run(&self) -> TaskResult {
        let outcomes = self.labels.sweep().await;
        let restored = outcomes.iter().filter(|(_, o)| o.is_write()).count();
        let failed = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, LabelOutcome::Deferred | LabelOutcome::Aborted))
            .count();
        let summary = format!(
            "checked {} rooms, restored {restored}, failed {failed}",
            outcomes.len()
        );
        if restored > 0 {
            info!("drift sweep: {summary}");
        }
        if failed > 0 {
            TaskResult::Error(summary)
        } else {
            TaskResult::Success(summary)
        }
    }
}

/// Keeps only the most recent `keep` messages of the activity channel.
pub struct HistoryRetentionTask {
    platform: Arc<dyn Platform>,
    resources: Arc<ResourceCache>,
    keep: usize,
    window: usize,
    shutdown: CancellationToken,
}

impl HistoryRetentionTask {
    #[must_use]
    pub fn new(
        platform: Arc<dyn Platform>,
        resources: Arc<ResourceCache>,
        keep: usize,
        window: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            platform,
            resources,
            keep,
            window,
            shutdown,
        }
    }
}

#[async_trait]
impl MaintenanceTask for HistoryRetentionTask {
    async fn run(&self) -> TaskResult {
        let channel = match self
            .resources
            .resolve_named(self.platform.as_ref(), NamedResource::Activity)
            .await
        {
            Ok(info) => info.id,
            Err(e) => return TaskResult::Error(format!("activity channel unavailable: {e}")),
        };
        let messages = match self.platform.recent_messages(channel, self.window).await {
            Ok(messages) => messages,
            Err(e) => return TaskResult::Error(format!("cannot read history: {e}")),
        };
        if messages.len() <= self.keep {
            return TaskResult::Success(format!("{} messages, nothing to trim", messages.len()));
        }

        let mut deleted = 0usize;
        let mut failed = 0usize;
        // Newest first from the platform; delete from the oldest end.
        for message in messages[self.keep..].iter().rev() {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.platform.delete_message(channel, message.id).await {
                Ok(()) => deleted += 1,
                Err(BotError::NotFound(_)) => {}
                Err(err @ BotError::PermissionDenied(_)) => {
                    error!("history retention: cannot delete in {channel}: {err}");
                    return TaskResult::Error(format!(
                        "permission denied after {deleted} deletions"
                    ));
                }
                Err(err) => {
                    warn!("history retention: delete {} failed: {err}", message.id);
                    failed += 1;
                }
            }
        }
        let summary = format!("deleted {deleted} old messages, {failed} failed");
        info!("history retention: {summary}");
        if failed > 0 {
            TaskResult::Error(summary)
        } else {
            TaskResult::Success(summary)
        }
    }
}

/// Shows a random subject as the bot's presence for `dwell`, then returns
/// to the steady presence.
pub struct ActivityCycleTask {
    platform: Arc<dyn Platform>,
    subjects: Vec<String>,
    steady: Presence,
    dwell: Duration,
    shutdown: CancellationToken,
}

impl ActivityCycleTask {
    #[must_use]
    pub fn new(
        platform: Arc<dyn Platform>,
        subjects: Vec<String>,
        steady: Presence,
        dwell: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            platform,
            subjects,
            steady,
            dwell,
            shutdown,
        }
    }
}

#[async_trait]
impl MaintenanceTask for ActivityCycleTask {
    async fn run(&self) -> TaskResult {
        let subject = self.subjects.choose(&mut rand::thread_rng()).cloned();
        let mut problems = Vec::new();

        if let Some(subject) = &subject {
            match self
                .platform
                .set_presence(Presence::new(ActivityKind::Playing, subject.clone()))
                .await
            {
                Ok(()) => info!("activity cycle: playing {subject}"),
                Err(e) => {
                    warn!("activity cycle: cannot set presence: {e}");
                    problems.push(format!("set: {e}"));
                }
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return TaskResult::Success("interrupted by shutdown".to_owned());
                }
                _ = tokio::time::sleep(self.dwell) => {}
            }
        }

        if let Err(e) = self.platform.set_presence(self.steady.clone()).await {
            warn!("activity cycle: cannot restore presence: {e}");
            problems.push(format!("reset: {e}"));
        }

        let shown = subject.as_deref().unwrap_or("nothing");
        if problems.is_empty() {
            TaskResult::Success(format!("showed {shown}, restored steady presence"))
        } else {
            TaskResult::Error(problems.join("; "))
        }
    }
}
