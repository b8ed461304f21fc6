//! Reconciliation scheduler.
//!
//! Runs the periodic maintenance loops (drift sweep, history retention,
//! activity cycle) independently of the event fast path.

pub mod runner;
pub mod tasks;

pub use runner::{Scheduler, SchedulerBuilder, SchedulerSnapshot, SchedulerState};
pub use tasks::{
    ActivityCycleTask, DriftSweepTask, HistoryRetentionTask, MaintenanceTask, ScheduledTask,
    TaskResult, TaskRunOutcome, TaskRunRecord, TaskStatus, TASK_ACTIVITY_CYCLE, TASK_DRIFT_SWEEP,
    TASK_HISTORY_RETENTION,
};
