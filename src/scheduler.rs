//! Periodic event scheduler
//!
//! Runs named application tasks on independent intervals without touching
//! the network loop. Timers auto-rearm until `stop` disarms them; task
//! definitions survive a stop so a later `start` resumes the same set.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{HandlerError, HandlerFuture};
use crate::status::StatusSink;

/// Refresh cadence for an attached status sink.
const SINK_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Zero-argument action fired by a task's timer.
pub type TaskCallback = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

/// A named periodic task. A task registered without an interval is defined
/// but never scheduled.
#[derive(Clone)]
pub struct TaskDef {
    pub name: String,
    pub interval: Option<Duration>,
    pub callback: TaskCallback,
}

/// Ordered set of task definitions, at most one per name.
#[derive(Clone, Default)]
pub struct TaskSet {
    tasks: Vec<TaskDef>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Registering a name again overwrites the earlier
    /// definition. `interval: None` permanently excludes the task from
    /// scheduling; that is not an error.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        interval: Option<Duration>,
        callback: TaskCallback,
    ) {
        let name = name.into();
        let def = TaskDef {
            name: name.clone(),
            interval,
            callback,
        };
        match self.tasks.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = def,
            None => self.tasks.push(def),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn scheduled(&self) -> Vec<ScheduledTask> {
        self.tasks
            .iter()
            .filter_map(|t| {
                t.interval.map(|interval| ScheduledTask {
                    name: t.name.clone(),
                    interval,
                    callback: t.callback.clone(),
                })
            })
            .collect()
    }
}

#[derive(Clone)]
struct ScheduledTask {
    name: String,
    interval: Duration,
    callback: TaskCallback,
}

/// Cooperative timer loop over the registered tasks.
///
/// State machine: Stopped -> Running via `start`, back via `stop`. Both
/// transitions are idempotent. Stopping disarms every timer synchronously;
/// no callback fires after `stop` returns.
pub struct PeriodicScheduler {
    tasks: Vec<ScheduledTask>,
    sink: Option<Arc<dyn StatusSink>>,
    timers: Vec<JoinHandle<()>>,
    active: bool,
}

impl PeriodicScheduler {
    /// Capture the schedulable tasks (those with a defined interval) from a
    /// task set.
    pub fn new(tasks: &TaskSet) -> Self {
        Self {
            tasks: tasks.scheduled(),
            sink: None,
            timers: Vec::new(),
            active: false,
        }
    }

    /// Attach a status sink; a fixed high-frequency refresh tick is armed
    /// alongside the task timers on the next `start`.
    pub fn attach_sink(&mut self, sink: Arc<dyn StatusSink>) {
        self.sink = Some(sink);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of currently armed timer handles.
    pub fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    /// Number of schedulable task definitions.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Arm one recurring timer per registered task. A no-op while already
    /// running.
    pub fn start(&mut self) {
        if self.active {
            debug!("scheduler already running");
            return;
        }

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .iter()
            .cloned()
            .map(spawn_task_timer)
            .collect();
        self.timers.extend(handles);

        if let Some(sink) = &self.sink {
            self.timers.push(spawn_sink_timer(sink.clone()));
        }

        self.active = true;
        info!(timers = self.timers.len(), "timers started");
    }

    /// Disarm every timer. Task definitions are kept, so a later `start`
    /// resumes with the identical set. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }

        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.active = false;
        info!("timers stopped");
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

fn spawn_task_timer(task: ScheduledTask) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(task.interval);
        // A slow callback delays its own later ticks instead of bursting.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // First tick completes immediately, skip it

        loop {
            ticker.tick().await;
            if let Err(HandlerError(detail)) = (task.callback)().await {
                error!(task = %task.name, "periodic task failed: {detail}");
            }
        }
    })
}

fn spawn_sink_timer(sink: Arc<dyn StatusSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SINK_REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sink.refresh();
        }
    })
}
