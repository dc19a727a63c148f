//! Plays a [`Plan`] against a [`SchedulerManager`] and records what happened.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ctxq_core::SchedulerConfig;
use ctxq_scheduler::{Job, SchedulerEvent, SchedulerManager, Task, TaskError, TaskState};

use crate::plan::{Action, Entry, Plan, PlannedTask};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    Enqueued { task: String, context: String, priority: String },
    Started { task: String, context: String },
    Finished { task: String, context: String, success: bool },
    Cancelled { task: String, context: String },
    Step { action: String },
    Event { event: SchedulerEvent },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub at_ms: u64,
    #[serde(flatten)]
    pub kind: TraceKind,
}

/// Shared, time-stamped record of a run.
#[derive(Clone)]
struct Trace {
    start: Instant,
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl Trace {
    fn new(start: Instant) -> Self {
        Self {
            start,
            records: Arc::default(),
        }
    }

    fn push(&self, kind: TraceKind) {
        let at_ms = self.start.elapsed().as_millis() as u64;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TraceRecord { at_ms, kind });
    }

    fn take(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Simulated work: records its start, sleeps, then succeeds or fails.
struct ScriptedJob {
    name: String,
    context: String,
    duration: Duration,
    fail: bool,
    trace: Trace,
}

#[async_trait]
impl Job for ScriptedJob {
    async fn execute(&self) -> Result<(), TaskError> {
        self.trace.push(TraceKind::Started {
            task: self.name.clone(),
            context: self.context.clone(),
        });
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        if self.fail {
            return Err(TaskError::failed(format!("{} was scripted to fail", self.name)));
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

pub struct RunReport {
    pub records: Vec<TraceRecord>,
    /// Whether every executing context went idle within the settle window.
    pub drained: bool,
    /// Contexts that still had pending tasks at the end, with their counts.
    pub leftover: Vec<(String, usize)>,
}

pub async fn run(plan: &Plan, config: &SchedulerConfig) -> Result<RunReport> {
    let start = Instant::now();
    let trace = Trace::new(start);
    let mut manager =
        SchedulerManager::from_config(config).context("failed to set up scheduler")?;
    let recorder = spawn_event_recorder(manager.subscribe(), trace.clone());

    let mut watchers: Vec<(Task, JoinHandle<()>)> = Vec::new();
    for (at_ms, entry) in plan.timeline() {
        tokio::time::sleep_until((start + Duration::from_millis(at_ms)).into()).await;
        match entry {
            Entry::Enqueue(planned) => {
                if let Some(watched) = enqueue(&mut manager, planned, &trace) {
                    watchers.push(watched);
                }
            }
            Entry::Apply(action) => apply(&mut manager, action, &trace),
        }
    }

    let drained = settle(&manager, Duration::from_millis(plan.settle_ms)).await;
    if !drained {
        warn!(settle_ms = plan.settle_ms, "contexts still executing after settle window");
    }
    let leftover: Vec<(String, usize)> = manager
        .context_names()
        .into_iter()
        .map(|name| {
            let count = manager.task_count(&name);
            (name, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect();

    // dropping the manager cancels anything still running
    drop(manager);
    for (task, handle) in watchers {
        if task.is_finished() {
            let _ = handle.await;
        } else {
            handle.abort();
        }
    }
    let _ = recorder.await;

    info!(elapsed_ms = start.elapsed().as_millis() as u64, drained, "run finished");
    Ok(RunReport {
        records: trace.take(),
        drained,
        leftover,
    })
}

fn enqueue(
    manager: &mut SchedulerManager<String>,
    planned: &PlannedTask,
    trace: &Trace,
) -> Option<(Task, JoinHandle<()>)> {
    let task = Task::new(ScriptedJob {
        name: planned.name.clone(),
        context: planned.context.clone(),
        duration: Duration::from_millis(planned.duration_ms),
        fail: planned.fail,
        trace: trace.clone(),
    });

    // recorded first so it precedes the start record
    trace.push(TraceKind::Enqueued {
        task: planned.name.clone(),
        context: planned.context.clone(),
        priority: planned.priority.clone(),
    });
    if let Err(e) = manager.enqueue_task(&planned.context, &task, &planned.priority) {
        trace.push(TraceKind::Rejected { reason: e.to_string() });
        return None;
    }

    let watcher = {
        let task = task.clone();
        let trace = trace.clone();
        let context = planned.context.clone();
        tokio::spawn(async move {
            let kind = match task.finished().await {
                TaskState::Cancelled => TraceKind::Cancelled {
                    task: task.name(),
                    context,
                },
                TaskState::Completed { success } => TraceKind::Finished {
                    task: task.name(),
                    context,
                    success,
                },
                _ => return,
            };
            trace.push(kind);
        })
    };
    Some((task, watcher))
}

fn apply(manager: &mut SchedulerManager<String>, action: &Action, trace: &Trace) {
    trace.push(TraceKind::Step {
        action: action.to_string(),
    });
    let result = match action {
        Action::Switch { context } => manager.set_current_context(context),
        Action::Activate => {
            manager.activate();
            Ok(())
        }
        Action::Deactivate => {
            manager.deactivate();
            Ok(())
        }
        Action::Stop { context } => manager.stop_context_execution(context),
        Action::Clear { context } => manager.clear_context(context),
    };
    if let Err(e) = result {
        trace.push(TraceKind::Rejected { reason: e.to_string() });
    }
}

fn spawn_event_recorder(
    mut rx: broadcast::Receiver<SchedulerEvent>,
    trace: Trace,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => trace.push(TraceKind::Event { event }),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event recorder lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Wait until no context is executing, up to `limit`.
async fn settle(manager: &SchedulerManager<String>, limit: Duration) -> bool {
    let names = manager.context_names();
    tokio::time::timeout(limit, async {
        while names.iter().any(|name| manager.is_context_executing(name)) {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok()
}
