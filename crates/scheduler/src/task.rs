//! Task handle and lifecycle.
//!
//! A [`Task`] wraps a [`Job`] with an explicit state machine:
//!
//! ```text
//! Idle ──run()──▶ Running ──complete()/fail()──▶ Completed { success }
//!   │                │
//!   └────cancel()────┴──────────cancel()───────▶ Cancelled
//! ```
//!
//! State transitions are published on a `watch` channel. Entering `Running`
//! is the "started" event, entering a terminal state is the "completed"
//! event; both happen at most once per run. Queues await
//! [`Task::finished`] instead of registering callbacks.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::job::{execute_caught, Job};
use crate::sync::{lock, read, write};

/// Unique identity of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
    /// Finished by the job itself or by an explicit `complete`/`fail`.
    Completed { success: bool },
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed { .. } | TaskState::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Idle => f.write_str("idle"),
            TaskState::Running => f.write_str("running"),
            TaskState::Completed { success: true } => f.write_str("succeeded"),
            TaskState::Completed { success: false } => f.write_str("failed"),
            TaskState::Cancelled => f.write_str("cancelled"),
        }
    }
}

struct TaskCore {
    state: TaskState,
    events: watch::Sender<TaskState>,
    work: Option<JoinHandle<()>>,
}

struct TaskInner {
    id: TaskId,
    name: RwLock<String>,
    job: Arc<dyn Job>,
    core: Mutex<TaskCore>,
}

/// Shared handle to a schedulable unit of work.
///
/// Cloning is cheap and every clone refers to the same task; equality and
/// hashing use the task's [`TaskId`].
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Wrap a job. The task takes the job's name.
    pub fn new(job: impl Job) -> Self {
        Self::from_arc(Arc::new(job))
    }

    /// Wrap a job under an explicit name.
    pub fn named(name: impl Into<String>, job: impl Job) -> Self {
        let task = Self::new(job);
        task.set_name(name);
        task
    }

    pub fn from_arc(job: Arc<dyn Job>) -> Self {
        let (events, _) = watch::channel(TaskState::Idle);
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                name: RwLock::new(job.name()),
                job,
                core: Mutex::new(TaskCore {
                    state: TaskState::Idle,
                    events,
                    work: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> String {
        read(&self.inner.name).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *write(&self.inner.name) = name.into();
    }

    pub fn state(&self) -> TaskState {
        lock(&self.inner.core).state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == TaskState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.state() == TaskState::Completed { success: true }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Start the job on the tokio runtime. Only an idle task can be run;
    /// returns `false` otherwise.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(&self) -> bool {
        let mut core = lock(&self.inner.core);
        if core.state != TaskState::Idle {
            warn!(task = %self.name(), state = %core.state, "task is not idle, not running it");
            return false;
        }

        core.state = TaskState::Running;
        core.events.send_replace(TaskState::Running);
        debug!(task = %self.name(), "task started");

        let task = self.clone();
        core.work = Some(tokio::spawn(async move {
            task.execute_guarded().await;
        }));
        true
    }

    /// Run the job and always land in a terminal state, whatever it does.
    async fn execute_guarded(&self) {
        let job = Arc::clone(&self.inner.job);
        match execute_caught(job.as_ref()).await {
            Ok(()) => {
                self.complete();
            }
            Err(TaskError::Panicked(msg)) => {
                error!(task = %self.name(), panic = %msg, "task panicked");
                self.fail();
            }
            Err(e) => {
                warn!(task = %self.name(), error = %e, "task failed");
                self.fail();
            }
        }
    }

    /// Mark the task successfully completed. No-op once terminal.
    pub fn complete(&self) -> bool {
        self.finish(TaskState::Completed { success: true })
    }

    /// Mark the task completed with failure. No-op once terminal.
    pub fn fail(&self) -> bool {
        self.finish(TaskState::Completed { success: false })
    }

    /// Cancel the task, aborting its job if it is running. No-op once terminal.
    pub fn cancel(&self) -> bool {
        self.finish(TaskState::Cancelled)
    }

    fn finish(&self, terminal: TaskState) -> bool {
        let work = {
            let mut core = lock(&self.inner.core);
            if core.state.is_terminal() {
                return false;
            }
            core.state = terminal;
            core.events.send_replace(terminal);
            core.work.take()
        };

        if terminal == TaskState::Cancelled {
            if let Some(handle) = work {
                handle.abort();
            }
            info!(task = %self.name(), "task cancelled");
        } else {
            debug!(task = %self.name(), outcome = %terminal, "task finished");
        }
        true
    }

    /// Wait until the task reaches a terminal state and return it.
    pub async fn finished(&self) -> TaskState {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(TaskState::is_terminal).await {
            Ok(state) => *state,
            // channel replaced by reset()
            Err(_) => self.state(),
        };
        state
    }

    /// Receiver for state transitions of the current run.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        lock(&self.inner.core).events.subscribe()
    }

    /// Return the task to `Idle` so the instance can be reused. A live task
    /// is cancelled first; listeners of the previous run are detached.
    pub fn reset(&self) {
        self.cancel();
        let mut core = lock(&self.inner.core);
        let (events, _) = watch::channel(TaskState::Idle);
        core.events = events;
        core.state = TaskState::Idle;
        core.work = None;
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Task {}

impl std::hash::Hash for Task {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use super::*;
    use crate::job::FnJob;

    const TIMEOUT: Duration = Duration::from_secs(2);

    struct Counting {
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Job for Counting {
        async fn execute(&self) -> Result<(), TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn blocked(gate: Arc<Notify>) -> Task {
        Task::named(
            "blocked",
            FnJob::new("blocked", move || {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<(), TaskError>(())
                }
            }),
        )
    }

    #[tokio::test]
    async fn run_completes_successfully() {
        let runs = Arc::new(AtomicU32::new(0));
        let task = Task::new(Counting { runs: runs.clone() });
        assert_eq!(task.name(), "Counting");
        assert!(task.is_idle());

        assert!(task.run());
        assert!(task.is_running());

        let state = timeout(TIMEOUT, task.finished()).await.unwrap();
        assert_eq!(state, TaskState::Completed { success: true });
        assert!(task.is_success());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_only_from_idle() {
        let runs = Arc::new(AtomicU32::new(0));
        let task = Task::new(Counting { runs: runs.clone() });
        assert!(task.run());
        assert!(!task.run(), "second run while running must be refused");
        timeout(TIMEOUT, task.finished()).await.unwrap();
        assert!(!task.run(), "terminal task must not run again");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_job_completes_as_failed() {
        let task = Task::new(FnJob::new("fails", || async {
            Err::<(), _>(TaskError::failed("disk full"))
        }));
        task.run();
        let state = timeout(TIMEOUT, task.finished()).await.unwrap();
        assert_eq!(state, TaskState::Completed { success: false });
        assert!(!task.is_success());
    }

    #[tokio::test]
    async fn panicking_job_still_terminates() {
        let task = Task::new(FnJob::new("panics", || async {
            if true {
                panic!("job blew up");
            }
            Ok::<(), TaskError>(())
        }));
        task.run();
        let state = timeout(TIMEOUT, task.finished()).await.unwrap();
        assert_eq!(state, TaskState::Completed { success: false });
    }

    #[tokio::test]
    async fn cancel_aborts_running_job() {
        let gate = Arc::new(Notify::new());
        let task = blocked(gate.clone());
        task.run();
        tokio::task::yield_now().await;

        assert!(task.cancel());
        assert!(task.is_cancelled());
        assert_eq!(timeout(TIMEOUT, task.finished()).await.unwrap(), TaskState::Cancelled);

        // the aborted job can no longer flip the state
        gate.notify_waiters();
        tokio::task::yield_now().await;
        assert!(task.is_cancelled());
    }

    #[tokio::test]
    async fn terminal_transitions_are_idempotent() {
        let task = blocked(Arc::new(Notify::new()));
        let mut rx = task.subscribe();
        task.run();

        assert!(task.complete());
        assert!(!task.complete());
        assert!(!task.cancel());
        assert!(!task.fail());
        assert!(task.is_success());

        // exactly one terminal notification
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), TaskState::Completed { success: true });
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn idle_task_can_be_cancelled() {
        let task = blocked(Arc::new(Notify::new()));
        assert!(task.cancel());
        assert!(!task.run());
        assert_eq!(task.finished().await, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn reset_allows_reuse() {
        let runs = Arc::new(AtomicU32::new(0));
        let task = Task::new(Counting { runs: runs.clone() });
        task.run();
        timeout(TIMEOUT, task.finished()).await.unwrap();

        let old_rx = task.subscribe();
        task.reset();
        assert!(task.is_idle());
        assert!(old_rx.has_changed().is_err(), "old listeners are detached");

        task.run();
        timeout(TIMEOUT, task.finished()).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reset_cancels_live_task() {
        let task = blocked(Arc::new(Notify::new()));
        let waiter = {
            let task = task.clone();
            tokio::spawn(async move { task.finished().await })
        };
        task.run();
        tokio::task::yield_now().await;

        task.reset();
        assert!(task.is_idle());
        let seen = timeout(TIMEOUT, waiter).await.unwrap().unwrap();
        assert_eq!(seen, TaskState::Cancelled);
    }

    #[test]
    fn identity_is_per_instance() {
        let a = blocked(Arc::new(Notify::new()));
        let b = blocked(Arc::new(Notify::new()));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        a.set_name("renamed");
        assert_eq!(a.clone().name(), "renamed");
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&TaskState::Completed { success: false }).unwrap();
        assert_eq!(json, r#"{"state":"completed","success":false}"#);
    }
}
