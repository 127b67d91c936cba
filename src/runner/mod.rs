//! Cooperative, time-budgeted task execution.
//!
//! Tasks run single-threaded in a fixed order and yield only at explicit
//! suspension points (between users, between clustering batches). The budget
//! is checked at those points and nowhere else, so an algorithm that has
//! started a batch always finishes it before the pipeline can stop. A
//! cross-process advisory file lock keeps at most one pipeline instance
//! mutating the store at a time.

pub mod tasks;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::db::Database;
use crate::error::VisageError;

/// Shared mutable state for one pipeline pass.
pub struct RunContext {
    started: Instant,
    budget: Option<Duration>,
    /// Which user the current task is processing. Stays set across a
    /// suspension or failure so the pipeline can report where work stopped.
    pub current_user: Option<String>,
    /// Counters accumulated by tasks, reported in the run summary.
    pub counters: BTreeMap<&'static str, u64>,
}

impl RunContext {
    /// `budget = None` disables the timeout entirely.
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
            current_user: None,
            counters: BTreeMap::new(),
        }
    }

    /// From the configured timeout; 0 seconds means unbudgeted.
    pub fn from_config(config: &Config) -> Self {
        let budget = match config.runner.timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self::new(budget)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the budget is spent. Tasks call this at suspension points
    /// and return [`TaskOutcome::Suspended`] without committing anything
    /// half-finished.
    pub fn out_of_time(&self) -> bool {
        match self.budget {
            Some(budget) => self.started.elapsed() >= budget,
            None => false,
        }
    }

    pub fn add_count(&mut self, key: &'static str, amount: u64) {
        *self.counters.entry(key).or_insert(0) += amount;
    }
}

/// How one task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ran over its whole collection.
    Completed,
    /// Stopped at a suspension point with work remaining. The pipeline
    /// stops here; the next scheduled pass picks the work up again.
    Suspended,
}

/// A named, idempotent unit of work. Tasks must be safe to re-run: they
/// derive everything from persisted state, never from a previous pass.
pub trait Task {
    fn name(&self) -> &'static str;

    fn run(&self, db: &Database, config: &Config, ctx: &mut RunContext) -> Result<TaskOutcome>;
}

/// What one pipeline pass did, for logging.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RunSummary {
    pub completed: Vec<&'static str>,
    pub failed: Vec<&'static str>,
    pub suspended: Option<&'static str>,
    pub elapsed_seconds: f64,
    pub counters: BTreeMap<&'static str, u64>,
}

/// Ordered task pipeline. A suspended task stops the whole pass (later
/// tasks would observe a half-processed store); a failed task is logged
/// and the pass continues, since tasks are independent and idempotent.
pub struct TaskPipeline {
    tasks: Vec<Box<dyn Task>>,
}

impl TaskPipeline {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn push(&mut self, task: Box<dyn Task>) {
        self.tasks.push(task);
    }

    pub fn run(&self, db: &Database, config: &Config, ctx: &mut RunContext) -> RunSummary {
        let mut summary = RunSummary::default();

        for task in &self.tasks {
            info!(task = task.name(), "task starting");
            match task.run(db, config, ctx) {
                Ok(TaskOutcome::Completed) => {
                    summary.completed.push(task.name());
                }
                Ok(TaskOutcome::Suspended) => {
                    info!(
                        task = task.name(),
                        user = ctx.current_user.as_deref(),
                        "task suspended on time budget"
                    );
                    summary.suspended = Some(task.name());
                    break;
                }
                Err(e) => {
                    error!(
                        task = task.name(),
                        user = ctx.current_user.as_deref(),
                        error = %e,
                        "task failed"
                    );
                    summary.failed.push(task.name());
                }
            }
        }

        summary.elapsed_seconds = ctx.elapsed().as_secs_f64();
        summary.counters = ctx.counters.clone();
        summary
    }
}

impl Default for TaskPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive cross-process advisory lock. Held for the lifetime of the
/// value; released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
}

impl ProcessLock {
    /// Acquire without blocking. A lock held elsewhere surfaces as
    /// [`VisageError::LockBusy`], which callers treat as "already running",
    /// not as a failure.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(VisageError::LockBusy.into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to lock {}", path.display())),
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
